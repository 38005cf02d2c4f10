//! Keystroke sinks.
//!
//! The session engine only ever talks to [`KeystrokeEmitter`]. Real OS injection
//! lives in [`backends`]; [`preview::PreviewEmitter`] keeps everything in memory.

pub mod backends;
pub mod preview;

use anyhow::{anyhow, Result};

pub use preview::{PreviewBuffer, PreviewEmitter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialKey {
    Backspace,
}

/// Sink for single characters and special keys.
pub trait KeystrokeEmitter: Send {
    fn write_char(&mut self, c: char) -> Result<()>;

    fn send_special(&mut self, key: SpecialKey) -> Result<()>;

    /// Runs once when the session ends, whatever the reason.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<E: KeystrokeEmitter + ?Sized> KeystrokeEmitter for Box<E> {
    fn write_char(&mut self, c: char) -> Result<()> {
        (**self).write_char(c)
    }

    fn send_special(&mut self, key: SpecialKey) -> Result<()> {
        (**self).send_special(key)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterBackend {
    Auto,
    Wayland,
    X11,
    Preview,
}

fn env_is_set(name: &str) -> bool {
    std::env::var_os(name)
        .map(|v| !v.is_empty())
        .unwrap_or(false)
}

fn auto_backend() -> EmitterBackend {
    let wayland_env = env_is_set("WAYLAND_DISPLAY") || env_is_set("WAYLAND_SOCKET");
    let x11_env = env_is_set("DISPLAY");

    // Prefer Wayland if both are present (common in Wayland sessions with Xwayland).
    if wayland_env {
        if cfg!(feature = "wayland") {
            return EmitterBackend::Wayland;
        }

        // Wayland detected but compiled out: use X11 when possible, otherwise keep
        // Wayland so the caller gets a "detected but disabled" error.
        if cfg!(feature = "x11") && x11_env {
            return EmitterBackend::X11;
        }
        return EmitterBackend::Wayland;
    }

    if x11_env {
        return EmitterBackend::X11;
    }

    EmitterBackend::Auto
}

fn backend_unavailable_message() -> String {
    let xdg_session_type = std::env::var("XDG_SESSION_TYPE").unwrap_or_default();

    let mut parts = Vec::new();

    if env_is_set("WAYLAND_DISPLAY") {
        parts.push("WAYLAND_DISPLAY is set".to_string());
    }
    if env_is_set("WAYLAND_SOCKET") {
        parts.push("WAYLAND_SOCKET is set".to_string());
    }
    if env_is_set("DISPLAY") {
        parts.push("DISPLAY is set".to_string());
    }
    if !xdg_session_type.is_empty() {
        parts.push(format!("XDG_SESSION_TYPE={xdg_session_type}"));
    }

    if parts.is_empty() {
        "No display session detected (expected Wayland or X11 environment variables).".to_string()
    } else {
        format!("Detected environment: {}", parts.join(", "))
    }
}

fn require_supported_backend(
    #[allow(unused_variables)] selected: EmitterBackend,
    resolved: EmitterBackend,
) -> Result<()> {
    match resolved {
        EmitterBackend::Preview => Ok(()),
        EmitterBackend::Wayland => {
            #[cfg(feature = "wayland")]
            {
                Ok(())
            }

            #[cfg(not(feature = "wayland"))]
            {
                let how = match selected {
                    EmitterBackend::Auto => "detected",
                    _ => "requested",
                };
                Err(anyhow!(
                    "Wayland backend {how} but is disabled in this build. (Rebuild with `--features wayland`.) {details}",
                    how = how,
                    details = backend_unavailable_message()
                ))
            }
        }
        EmitterBackend::X11 => {
            #[cfg(feature = "x11")]
            {
                Ok(())
            }

            #[cfg(not(feature = "x11"))]
            {
                let how = match selected {
                    EmitterBackend::Auto => "detected",
                    _ => "requested",
                };
                Err(anyhow!(
                    "X11 backend {how} but is disabled in this build. (Rebuild with `--features x11`.) {details}",
                    how = how,
                    details = backend_unavailable_message()
                ))
            }
        }
        EmitterBackend::Auto => {
            let mut forced = Vec::new();
            if cfg!(feature = "wayland") {
                forced.push("--backend wayland");
            }
            if cfg!(feature = "x11") {
                forced.push("--backend x11");
            }
            let hint = if forced.is_empty() {
                "This build has no keystroke backends enabled; use `ghosttype preview`."
            } else if forced.len() == 1 {
                "Try passing the available backend flag to force it."
            } else {
                "Try forcing a backend."
            };

            Err(anyhow!(
                "No supported keystroke backend detected. {details}\n\
                 {hint} {}",
                forced.join(" or "),
                details = backend_unavailable_message(),
                hint = hint,
            ))
        }
    }
}

pub fn resolve_backend(requested: EmitterBackend) -> Result<EmitterBackend> {
    let resolved = match requested {
        EmitterBackend::Auto => auto_backend(),
        other => other,
    };

    require_supported_backend(requested, resolved)?;
    Ok(resolved)
}

pub fn preflight_backend(
    requested: EmitterBackend,
    seat_name: Option<&str>,
) -> Result<EmitterBackend> {
    if let Some(name) = seat_name {
        if name.trim().is_empty() {
            return Err(anyhow!("--seat must not be empty"));
        }
    }

    let resolved = resolve_backend(requested)?;

    if seat_name.is_some() && resolved != EmitterBackend::Wayland {
        return Err(anyhow!("--seat is Wayland-only"));
    }

    Ok(resolved)
}

/// Open the emitter for `backend`, connecting to the display server if needed.
pub fn open_emitter(
    backend: EmitterBackend,
    seat_name: Option<&str>,
) -> Result<Box<dyn KeystrokeEmitter>> {
    let backend = preflight_backend(backend, seat_name)?;

    match backend {
        EmitterBackend::Preview => Ok(Box::new(PreviewEmitter::new())),
        EmitterBackend::Wayland => {
            #[cfg(feature = "wayland")]
            {
                Ok(Box::new(backends::wayland::WaylandEmitter::open(
                    seat_name,
                )?))
            }

            #[cfg(not(feature = "wayland"))]
            {
                Err(anyhow!(
                    "Wayland backend is disabled in this build (rebuild with `--features wayland`)."
                ))
            }
        }
        EmitterBackend::X11 => {
            #[cfg(feature = "x11")]
            {
                Ok(Box::new(backends::x11::X11Emitter::open()?))
            }

            #[cfg(not(feature = "x11"))]
            {
                Err(anyhow!(
                    "X11 backend is disabled in this build (rebuild with `--features x11`)."
                ))
            }
        }
        EmitterBackend::Auto => Err(anyhow!("no backend resolved")),
    }
}
