use std::ffi::OsString;
use std::sync::{Mutex, OnceLock};

use ghosttype::emitter::{open_emitter, preflight_backend, resolve_backend, EmitterBackend};

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

struct EnvRestore {
    wayland_display: Option<OsString>,
    wayland_socket: Option<OsString>,
    display: Option<OsString>,
}

impl EnvRestore {
    fn snapshot() -> Self {
        Self {
            wayland_display: std::env::var_os("WAYLAND_DISPLAY"),
            wayland_socket: std::env::var_os("WAYLAND_SOCKET"),
            display: std::env::var_os("DISPLAY"),
        }
    }
}

impl Drop for EnvRestore {
    fn drop(&mut self) {
        // SAFETY: every env mutation in this file happens under `env_lock()`.
        for (name, value) in [
            ("WAYLAND_DISPLAY", &self.wayland_display),
            ("WAYLAND_SOCKET", &self.wayland_socket),
            ("DISPLAY", &self.display),
        ] {
            match value {
                Some(v) => unsafe { std::env::set_var(name, v) },
                None => unsafe { std::env::remove_var(name) },
            }
        }
    }
}

fn unset(name: &str) {
    // SAFETY: callers hold the global test mutex from `env_lock()`.
    unsafe { std::env::remove_var(name) };
}

fn set(name: &str, value: &str) {
    // SAFETY: callers hold the global test mutex from `env_lock()`.
    unsafe { std::env::set_var(name, value) };
}

#[test]
fn auto_prefers_wayland_when_both_present() {
    let _guard = env_lock().lock().unwrap();
    let _restore = EnvRestore::snapshot();

    unset("WAYLAND_SOCKET");
    set("WAYLAND_DISPLAY", "wayland-1");
    set("DISPLAY", ":0");

    #[cfg(feature = "wayland")]
    {
        let resolved = resolve_backend(EmitterBackend::Auto).expect("should resolve");
        assert_eq!(resolved, EmitterBackend::Wayland);
    }

    #[cfg(all(not(feature = "wayland"), feature = "x11"))]
    {
        let resolved = resolve_backend(EmitterBackend::Auto).expect("should resolve");
        assert_eq!(resolved, EmitterBackend::X11);
    }

    #[cfg(all(not(feature = "wayland"), not(feature = "x11")))]
    {
        let err = resolve_backend(EmitterBackend::Auto).unwrap_err();
        assert!(format!("{err:#}").contains("disabled in this build"));
    }
}

#[test]
fn auto_without_display_session_is_an_error() {
    let _guard = env_lock().lock().unwrap();
    let _restore = EnvRestore::snapshot();

    unset("WAYLAND_DISPLAY");
    unset("WAYLAND_SOCKET");
    unset("DISPLAY");

    let err = resolve_backend(EmitterBackend::Auto).unwrap_err();
    let msg = format!("{err:#}");
    assert!(
        msg.contains("No supported keystroke backend detected"),
        "expected missing-backend wording, got: {msg}"
    );
}

#[test]
fn auto_resolves_x11_when_only_display_is_set() {
    let _guard = env_lock().lock().unwrap();
    let _restore = EnvRestore::snapshot();

    unset("WAYLAND_DISPLAY");
    unset("WAYLAND_SOCKET");
    set("DISPLAY", ":0");

    #[cfg(feature = "x11")]
    {
        let resolved = resolve_backend(EmitterBackend::Auto).expect("should resolve");
        assert_eq!(resolved, EmitterBackend::X11);
    }

    #[cfg(not(feature = "x11"))]
    {
        let err = resolve_backend(EmitterBackend::Auto).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("DISPLAY is set"), "{msg}");
    }
}

#[test]
fn seat_is_rejected_outside_wayland() {
    let _guard = env_lock().lock().unwrap();
    let _restore = EnvRestore::snapshot();

    unset("WAYLAND_DISPLAY");
    unset("WAYLAND_SOCKET");
    set("DISPLAY", ":0");

    let err = preflight_backend(EmitterBackend::Preview, Some("seat1")).unwrap_err();
    assert!(format!("{err:#}").contains("--seat"), "{err:#}");

    let err = preflight_backend(EmitterBackend::Preview, Some("  ")).unwrap_err();
    assert!(format!("{err:#}").contains("must not be empty"), "{err:#}");
}

#[test]
fn preview_backend_needs_no_display() {
    let _guard = env_lock().lock().unwrap();
    let _restore = EnvRestore::snapshot();

    unset("WAYLAND_DISPLAY");
    unset("WAYLAND_SOCKET");
    unset("DISPLAY");

    assert_eq!(
        preflight_backend(EmitterBackend::Preview, None).unwrap(),
        EmitterBackend::Preview
    );
    assert!(open_emitter(EmitterBackend::Preview, None).is_ok());
}
