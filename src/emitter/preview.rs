use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, Result};

use super::{KeystrokeEmitter, SpecialKey};

#[derive(Debug, Default)]
struct EditorState {
    buf: Vec<char>,
    keystrokes: usize,
}

impl EditorState {
    fn insert_char(&mut self, c: char) {
        self.buf.push(c);
        self.keystrokes += 1;
    }

    fn backspace(&mut self) {
        self.buf.pop();
        self.keystrokes += 1;
    }
}

/// Read side of a [`PreviewEmitter`], usable after the emitter moved into a session.
#[derive(Debug, Clone, Default)]
pub struct PreviewBuffer {
    inner: Arc<Mutex<EditorState>>,
}

impl PreviewBuffer {
    pub fn text(&self) -> String {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.buf.iter().collect()
    }

    /// Characters and backspaces received so far.
    pub fn keystrokes(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keystrokes
    }
}

/// Emitter that only edits an in-memory buffer, as a text field with the cursor
/// pinned to the end would.
#[derive(Debug, Default)]
pub struct PreviewEmitter {
    buffer: PreviewBuffer,
}

impl PreviewEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&self) -> PreviewBuffer {
        self.buffer.clone()
    }

    fn edit(&self, f: impl FnOnce(&mut EditorState)) -> Result<()> {
        let mut state = self
            .buffer
            .inner
            .lock()
            .map_err(|_| anyhow!("preview buffer lock poisoned"))?;
        f(&mut state);
        Ok(())
    }
}

impl KeystrokeEmitter for PreviewEmitter {
    fn write_char(&mut self, c: char) -> Result<()> {
        self.edit(|state| state.insert_char(c))
    }

    fn send_special(&mut self, key: SpecialKey) -> Result<()> {
        match key {
            SpecialKey::Backspace => self.edit(EditorState::backspace),
        }
    }
}
