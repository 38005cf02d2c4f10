use std::collections::HashMap;
use std::io::Write;
use std::os::fd::{AsFd, OwnedFd};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use memfd::MemfdOptions;
use wayland_client::globals::{registry_queue_init, GlobalListContents};
use wayland_client::protocol::{wl_registry, wl_seat};
use wayland_client::{Connection, Dispatch, Proxy, QueueHandle};
use xkbcommon::xkb;

use crate::emitter::{KeystrokeEmitter, SpecialKey};
use crate::keyboard::{self, KeyStroke};

use self::virtual_keyboard::zwp_virtual_keyboard_manager_v1::ZwpVirtualKeyboardManagerV1;
use self::virtual_keyboard::zwp_virtual_keyboard_v1::ZwpVirtualKeyboardV1;

/// Client bindings for `zwp_virtual_keyboard_unstable_v1`.
mod virtual_keyboard {
    #![allow(dead_code)]

    use wayland_client;
    use wayland_client::protocol::*;

    pub mod __interfaces {
        use wayland_client::protocol::__interfaces::*;
        wayland_scanner::generate_interfaces!("protocol/virtual-keyboard-unstable-v1.xml");
    }

    use self::__interfaces::*;

    wayland_scanner::generate_client_code!("protocol/virtual-keyboard-unstable-v1.xml");
}

const KEYMAP_FORMAT_XKB_V1: u32 = 1;

#[derive(Debug, Clone)]
struct SeatData {
    global_name: u32,
}

#[derive(Debug, Default)]
struct State {
    seat_names_by_global: HashMap<u32, String>,
}

impl Dispatch<wl_registry::WlRegistry, GlobalListContents> for State {
    fn event(
        _state: &mut Self,
        _proxy: &wl_registry::WlRegistry,
        _event: wl_registry::Event,
        _data: &GlobalListContents,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<wl_seat::WlSeat, SeatData> for State {
    fn event(
        state: &mut Self,
        _proxy: &wl_seat::WlSeat,
        event: wl_seat::Event,
        data: &SeatData,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_seat::Event::Name { name } = event {
            state.seat_names_by_global.insert(data.global_name, name);
        }
    }
}

impl Dispatch<ZwpVirtualKeyboardManagerV1, ()> for State {
    fn event(
        _state: &mut Self,
        _proxy: &ZwpVirtualKeyboardManagerV1,
        _event: <ZwpVirtualKeyboardManagerV1 as Proxy>::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<ZwpVirtualKeyboardV1, ()> for State {
    fn event(
        _state: &mut Self,
        _proxy: &ZwpVirtualKeyboardV1,
        _event: <ZwpVirtualKeyboardV1 as Proxy>::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
    }
}

struct UsKeymap {
    text: String,
    shift_mask: u32,
}

fn us_qwerty_keymap() -> Result<UsKeymap> {
    let context = xkb::Context::new(xkb::CONTEXT_NO_FLAGS);

    let keymap = xkb::Keymap::new_from_names(
        &context,
        "evdev",
        "pc105",
        "us",
        "",
        None,
        xkb::KEYMAP_COMPILE_NO_FLAGS,
    )
    .ok_or_else(|| anyhow!("failed to build xkb keymap for us/pc105"))?;

    let shift_index = keymap.mod_get_index(xkb::MOD_NAME_SHIFT);
    if shift_index == xkb::MOD_INVALID {
        return Err(anyhow!("xkb keymap missing Shift modifier"));
    }
    let shift_mask = 1u32
        .checked_shl(shift_index)
        .ok_or_else(|| anyhow!("Shift modifier index out of range"))?;

    Ok(UsKeymap {
        text: keymap.get_as_string(xkb::KEYMAP_FORMAT_TEXT_V1),
        shift_mask,
    })
}

fn make_keymap_fd(keymap: &str) -> Result<(OwnedFd, u32)> {
    let memfd = MemfdOptions::default()
        .allow_sealing(true)
        .create("ghosttype-xkb-keymap")
        .context("failed to create memfd for keymap")?;

    let mut file = memfd.as_file();
    file.write_all(keymap.as_bytes())?;
    file.write_all(&[0])?;

    let size = (keymap.len() + 1)
        .try_into()
        .map_err(|_| anyhow!("keymap too large"))?;

    Ok((OwnedFd::from(memfd.into_file()), size))
}

fn bind_seat(
    globals: &wayland_client::globals::GlobalList,
    event_queue: &mut wayland_client::EventQueue<State>,
    state: &mut State,
    seat_name: Option<&str>,
) -> Result<wl_seat::WlSeat> {
    let qh = event_queue.handle();
    let seat_globals: Vec<_> = globals
        .contents()
        .clone_list()
        .into_iter()
        .filter(|g| g.interface == wl_seat::WlSeat::interface().name)
        .collect();

    let Some(first) = seat_globals.first() else {
        return Err(anyhow!("wl_seat not available (no seats advertised)"));
    };

    let Some(requested) = seat_name else {
        return Ok(globals.registry().bind(
            first.name,
            first.version.min(7),
            &qh,
            SeatData {
                global_name: first.name,
            },
        ));
    };

    let seats: Vec<(u32, wl_seat::WlSeat)> = seat_globals
        .iter()
        .map(|g| {
            let seat = globals.registry().bind(
                g.name,
                g.version.min(7),
                &qh,
                SeatData {
                    global_name: g.name,
                },
            );
            (g.name, seat)
        })
        .collect();

    event_queue
        .roundtrip(state)
        .context("Wayland roundtrip (seat discovery) failed")?;

    if let Some(seat) = seats.iter().find_map(|(global_name, seat)| {
        state
            .seat_names_by_global
            .get(global_name)
            .filter(|n| n.as_str() == requested)
            .map(|_| seat.clone())
    }) {
        return Ok(seat);
    }

    let mut names = state
        .seat_names_by_global
        .values()
        .cloned()
        .collect::<Vec<_>>();
    names.sort();
    names.dedup();

    if names.is_empty() {
        return Err(anyhow!(
            "requested seat {requested:?}, but compositor did not advertise any wl_seat.name values (requires wl_seat v2+)"
        ));
    }

    Err(anyhow!(
        "requested seat {requested:?} not found; available seats: {}",
        names.join(", ")
    ))
}

/// Injects keystrokes through `zwp_virtual_keyboard_v1` with a US-QWERTY keymap.
pub struct WaylandEmitter {
    conn: Connection,
    keyboard: ZwpVirtualKeyboardV1,
    shift_mask: u32,
    shift_down: bool,
    start: Instant,
    // The compositor maps the keymap lazily on some implementations.
    _keymap_fd: OwnedFd,
}

impl WaylandEmitter {
    pub fn open(seat_name: Option<&str>) -> Result<Self> {
        let conn = Connection::connect_to_env().context("failed to connect to Wayland")?;
        let (globals, mut event_queue) =
            registry_queue_init(&conn).context("failed to init Wayland registry")?;
        let qh = event_queue.handle();
        let mut state = State::default();

        let manager: ZwpVirtualKeyboardManagerV1 = globals
            .bind(&qh, 1..=1, ())
            .context("zwp_virtual_keyboard_manager_v1 not available (is sway/wlroots exposing it?)")?;

        let seat = bind_seat(&globals, &mut event_queue, &mut state, seat_name)?;
        let keyboard: ZwpVirtualKeyboardV1 = manager.create_virtual_keyboard(&seat, &qh, ());

        event_queue
            .roundtrip(&mut state)
            .context("Wayland roundtrip failed")?;

        let keymap = us_qwerty_keymap()?;
        let (keymap_fd, keymap_size) = make_keymap_fd(&keymap.text)?;
        keyboard.keymap(KEYMAP_FORMAT_XKB_V1, keymap_fd.as_fd(), keymap_size);
        conn.flush().context("Wayland flush failed")?;

        Ok(Self {
            conn,
            keyboard,
            shift_mask: keymap.shift_mask,
            shift_down: false,
            start: Instant::now(),
            _keymap_fd: keymap_fd,
        })
    }

    fn time_ms(&self) -> u32 {
        self.start
            .elapsed()
            .as_millis()
            .try_into()
            .unwrap_or(u32::MAX)
    }

    fn set_shift(&mut self, down: bool) {
        if self.shift_down == down {
            return;
        }
        let time_ms = self.time_ms();
        self.keyboard
            .key(time_ms, keyboard::KEY_LEFTSHIFT, u32::from(down));
        let mods = if down { self.shift_mask } else { 0 };
        self.keyboard.modifiers(mods, 0, 0, 0);
        self.shift_down = down;
    }

    fn tap(&mut self, stroke: KeyStroke) -> Result<()> {
        self.set_shift(stroke.shift);
        let time_ms = self.time_ms();
        self.keyboard.key(time_ms, stroke.keycode, 1);
        self.keyboard.key(time_ms, stroke.keycode, 0);

        if let Err(e) = self
            .conn
            .flush()
            .with_context(|| format!("Wayland flush failed (keycode={})", stroke.keycode))
        {
            tracing::warn!("keystroke injection failed, resetting modifiers");
            self.reset_modifiers_best_effort();
            return Err(e);
        }
        Ok(())
    }

    fn reset_modifiers_best_effort(&mut self) {
        self.keyboard.modifiers(0, 0, 0, 0);
        let time_ms = self.time_ms();
        // Releases may be sent for keys that are not down.
        for keycode in keyboard::COMMON_MODIFIER_KEYCODES {
            self.keyboard.key(time_ms, keycode, 0);
        }
        self.shift_down = false;
        let _ = self.conn.flush();
    }
}

impl KeystrokeEmitter for WaylandEmitter {
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
        self.reset_modifiers_best_effort();
        Ok(())
    }
}

impl Drop for WaylandEmitter {
    fn drop(&mut self) {
        self.keyboard.destroy();
        let _ = self.conn.flush();
    }
}
