use anyhow::{anyhow, Context, Result};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{ConnectionExt as _, GetInputFocusReply};
use x11rb::protocol::xtest::ConnectionExt as _;
use x11rb::protocol::{xproto, xtest};
use x11rb::rust_connection::RustConnection;

use crate::emitter::{KeystrokeEmitter, SpecialKey};
use crate::keyboard::{self, KeyStroke};

fn evdev_to_x11_keycode(evdev_keycode: u32) -> Result<u8> {
    // On most Linux Xorg setups, X11 keycodes are evdev + 8.
    let x11 = evdev_keycode
        .checked_add(8)
        .ok_or_else(|| anyhow!("evdev keycode overflow"))?;
    u8::try_from(x11).map_err(|_| anyhow!("evdev keycode {evdev_keycode} out of range for X11"))
}

fn query_xtest(conn: &impl Connection) -> Result<()> {
    let ext = conn
        .extension_information(xtest::X11_EXTENSION_NAME)
        .context("failed to query X11 extension info")?;

    if ext.is_none() {
        return Err(anyhow!(
            "X11 backend requires the XTEST extension (not present on this X server)"
        ));
    }

    let _ = conn
        .xtest_get_version(2, 2)
        .ok()
        .and_then(|cookie| cookie.reply().ok());

    Ok(())
}

fn get_focus(conn: &impl Connection) -> Result<GetInputFocusReply> {
    conn.get_input_focus()
        .context("failed to request input focus")?
        .reply()
        .context("failed to read input focus reply")
}

fn keysym_for_keycode(
    conn: &impl Connection,
    keycode: u8,
    index: usize,
) -> Result<xproto::Keysym> {
    let reply = conn
        .get_keyboard_mapping(keycode, 1)
        .context("failed to request keyboard mapping")?
        .reply()
        .context("failed to read keyboard mapping")?;

    if reply.keysyms_per_keycode == 0 {
        return Err(anyhow!("X server returned 0 keysyms per keycode"));
    }

    Ok(reply
        .keysyms
        .get(index)
        .copied()
        .unwrap_or(x11rb::NO_SYMBOL))
}

fn validate_us_keymap(conn: &impl Connection) -> Result<()> {
    // Latin-1 keysyms equal their character code, which covers every check here.
    let checks: &[(u32, char, char)] = &[
        (keyboard::KEY_A, 'a', 'A'),
        (keyboard::KEY_Q, 'q', 'Q'),
        (keyboard::KEY_1, '1', '!'),
        (keyboard::KEY_MINUS, '-', '_'),
        (keyboard::KEY_APOSTROPHE, '\'', '"'),
        (keyboard::KEY_SLASH, '/', '?'),
    ];

    for &(evdev, unshifted, shifted) in checks {
        let keycode = evdev_to_x11_keycode(evdev)?;
        let got0 = keysym_for_keycode(conn, keycode, 0)?;
        let got1 = keysym_for_keycode(conn, keycode, 1)?;

        if got0 == x11rb::NO_SYMBOL || got1 == x11rb::NO_SYMBOL {
            return Err(anyhow!(
                "X11 backend could not validate the X server keymap (keycode {keycode}: got {got0:#x}/{got1:#x}). This backend assumes X11 keycodes are evdev+8 and requires a US keymap."
            ));
        }

        if got0 != unshifted as u32 || got1 != shifted as u32 {
            return Err(anyhow!(
                "X11 backend requires a US keyboard layout, but the X server keymap does not match (keycode {keycode}: got {got0:#x}/{got1:#x}). Try `setxkbmap us`."
            ));
        }
    }

    Ok(())
}

/// Injects keystrokes into the focused X11 window through XTEST.
pub struct X11Emitter {
    conn: RustConnection,
    root: xproto::Window,
    shift_down: bool,
    focus_checked: bool,
}

impl X11Emitter {
    /// Connect and validate the server. Focus is checked on the first keystroke, after
    /// the countdown has given the user time to click into the target window.
    pub fn open() -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None).context("failed to connect to X11")?;
        query_xtest(&conn)?;
        validate_us_keymap(&conn)?;

        let root = conn
            .setup()
            .roots
            .get(screen_num)
            .ok_or_else(|| anyhow!("invalid X11 screen index"))?
            .root;

        let emitter = Self {
            conn,
            root,
            shift_down: false,
            focus_checked: false,
        };
        // X11 has no per-client modifier state; start from a neutral one.
        emitter.reset_common_modifiers_best_effort();
        Ok(emitter)
    }

    fn ensure_focus(&mut self) -> Result<()> {
        if self.focus_checked {
            return Ok(());
        }

        // X11 special focus value: PointerRoot means focus follows the pointer.
        const POINTER_ROOT: xproto::Window = 1;
        let focus = get_focus(&self.conn)?;
        if focus.focus == x11rb::NONE {
            return Err(anyhow!(
                "no X11 input focus detected; click into the target editor before typing starts"
            ));
        }
        if focus.focus == POINTER_ROOT {
            return Err(anyhow!(
                "X11 input focus is set to PointerRoot; click into the target editor window to give it explicit focus"
            ));
        }

        self.focus_checked = true;
        Ok(())
    }

    fn fake_key(&self, evdev_keycode: u32, pressed: bool) -> Result<()> {
        let keycode = evdev_to_x11_keycode(evdev_keycode)?;
        let type_ = if pressed {
            xproto::KEY_PRESS_EVENT
        } else {
            xproto::KEY_RELEASE_EVENT
        };
        self.conn
            .xtest_fake_input(type_, keycode, x11rb::CURRENT_TIME, self.root, 0, 0, 0)
            .context("failed to send XTEST fake input")?;
        Ok(())
    }

    fn set_shift(&mut self, down: bool) -> Result<()> {
        if self.shift_down != down {
            self.fake_key(keyboard::KEY_LEFTSHIFT, down)?;
            self.shift_down = down;
        }
        Ok(())
    }

    fn tap(&mut self, stroke: KeyStroke) -> Result<()> {
        self.ensure_focus()?;
        self.set_shift(stroke.shift)?;
        self.fake_key(stroke.keycode, true)?;
        self.fake_key(stroke.keycode, false)?;
        self.conn
            .flush()
            .context("failed to flush X11 connection")?;
        Ok(())
    }

    fn reset_common_modifiers_best_effort(&self) {
        // Releases may be sent for keys that are not down.
        for keycode in keyboard::COMMON_MODIFIER_KEYCODES {
            let _ = self.fake_key(keycode, false);
        }
        let _ = self.conn.flush();
    }
}

impl KeystrokeEmitter for X11Emitter {
    fn write_char(&mut self, c: char) -> Result<()> {
        let stroke = keyboard::keystroke_for_output_char(c)
            .ok_or_else(|| anyhow!("unsupported character for US QWERTY: {c:?}"))?;
        self.tap(stroke)
    }

    fn send_special(&mut self, key: SpecialKey) -> Result<()> {
        match key {
            SpecialKey::Backspace => self.tap(KeyStroke {
                keycode: keyboard::KEY_BACKSPACE,
                shift: false,
            }),
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.shift_down = false;
        self.reset_common_modifiers_best_effort();
        Ok(())
    }
}
