use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStroke {
    pub keycode: u32,
    pub shift: bool,
}

// Linux evdev keycodes (see linux/input-event-codes.h)
pub const KEY_1: u32 = 2;
pub const KEY_2: u32 = 3;
pub const KEY_3: u32 = 4;
pub const KEY_4: u32 = 5;
pub const KEY_5: u32 = 6;
pub const KEY_6: u32 = 7;
pub const KEY_7: u32 = 8;
pub const KEY_8: u32 = 9;
pub const KEY_9: u32 = 10;
pub const KEY_0: u32 = 11;

pub const KEY_MINUS: u32 = 12;
pub const KEY_EQUAL: u32 = 13;
pub const KEY_BACKSPACE: u32 = 14;

pub const KEY_Q: u32 = 16;
pub const KEY_W: u32 = 17;
pub const KEY_E: u32 = 18;
pub const KEY_R: u32 = 19;
pub const KEY_T: u32 = 20;
pub const KEY_Y: u32 = 21;
pub const KEY_U: u32 = 22;
pub const KEY_I: u32 = 23;
pub const KEY_O: u32 = 24;
pub const KEY_P: u32 = 25;

pub const KEY_LEFTBRACE: u32 = 26;
pub const KEY_RIGHTBRACE: u32 = 27;
pub const KEY_ENTER: u32 = 28;

pub const KEY_LEFTCTRL: u32 = 29;

pub const KEY_A: u32 = 30;
pub const KEY_S: u32 = 31;
pub const KEY_D: u32 = 32;
pub const KEY_F: u32 = 33;
pub const KEY_G: u32 = 34;
pub const KEY_H: u32 = 35;
pub const KEY_J: u32 = 36;
pub const KEY_K: u32 = 37;
pub const KEY_L: u32 = 38;

pub const KEY_SEMICOLON: u32 = 39;
pub const KEY_APOSTROPHE: u32 = 40;
pub const KEY_GRAVE: u32 = 41;

pub const KEY_LEFTSHIFT: u32 = 42;

pub const KEY_BACKSLASH: u32 = 43;

pub const KEY_Z: u32 = 44;
pub const KEY_X: u32 = 45;
pub const KEY_C: u32 = 46;
pub const KEY_V: u32 = 47;
pub const KEY_B: u32 = 48;
pub const KEY_N: u32 = 49;
pub const KEY_M: u32 = 50;

pub const KEY_COMMA: u32 = 51;
pub const KEY_DOT: u32 = 52;
pub const KEY_SLASH: u32 = 53;

pub const KEY_RIGHTSHIFT: u32 = 54;

pub const KEY_LEFTALT: u32 = 56;
pub const KEY_SPACE: u32 = 57;

pub const KEY_RIGHTCTRL: u32 = 97;
pub const KEY_RIGHTALT: u32 = 100;

/// Keycodes for `a..=z`, in alphabetical order.
const LETTER_KEYCODES: [u32; 26] = [
    KEY_A, KEY_B, KEY_C, KEY_D, KEY_E, KEY_F, KEY_G, KEY_H, KEY_I, KEY_J, KEY_K, KEY_L, KEY_M,
    KEY_N, KEY_O, KEY_P, KEY_Q, KEY_R, KEY_S, KEY_T, KEY_U, KEY_V, KEY_W, KEY_X, KEY_Y, KEY_Z,
];

/// Non-letter keys as (unshifted, shifted, keycode).
const PAIRED_KEYS: [(char, char, u32); 21] = [
    ('1', '!', KEY_1),
    ('2', '@', KEY_2),
    ('3', '#', KEY_3),
    ('4', '$', KEY_4),
    ('5', '%', KEY_5),
    ('6', '^', KEY_6),
    ('7', '&', KEY_7),
    ('8', '*', KEY_8),
    ('9', '(', KEY_9),
    ('0', ')', KEY_0),
    ('-', '_', KEY_MINUS),
    ('=', '+', KEY_EQUAL),
    ('[', '{', KEY_LEFTBRACE),
    (']', '}', KEY_RIGHTBRACE),
    ('\\', '|', KEY_BACKSLASH),
    (';', ':', KEY_SEMICOLON),
    ('\'', '"', KEY_APOSTROPHE),
    ('`', '~', KEY_GRAVE),
    (',', '<', KEY_COMMA),
    ('.', '>', KEY_DOT),
    ('/', '?', KEY_SLASH),
];

/// Modifiers released on abort/error so a run never leaves one held down.
pub const COMMON_MODIFIER_KEYCODES: [u32; 6] = [
    KEY_LEFTSHIFT,
    KEY_RIGHTSHIFT,
    KEY_LEFTCTRL,
    KEY_RIGHTCTRL,
    KEY_LEFTALT,
    KEY_RIGHTALT,
];

/// Map an output character to the ASCII character that is actually typed.
pub fn typed_char_for_output_char(c: char) -> Option<char> {
    match c {
        '\n' => Some('\n'),
        // Tab and CR are not in the safe allowlist.
        '\t' | '\r' => None,

        // Editors such as Google Docs turn ASCII quotes back into smart quotes.
        '’' | '‘' => Some('\''),
        '”' | '“' => Some('"'),

        c if c.is_ascii_graphic() || c == ' ' => Some(c),
        _ => None,
    }
}

pub fn keystroke_for_output_char(c: char) -> Option<KeyStroke> {
    typed_char_for_output_char(c).and_then(char_to_keystroke)
}

pub fn is_typeable(text: &str) -> bool {
    text.chars().all(|c| keystroke_for_output_char(c).is_some())
}

pub fn find_first_unsupported_char(text: &str) -> Option<(usize, char)> {
    text.char_indices()
        .find(|&(_idx, c)| keystroke_for_output_char(c).is_none())
}

/// Line and column (both 1-based) of a byte offset, for error messages.
pub fn byte_index_to_line_col(text: &str, byte_idx: usize) -> (usize, usize) {
    let mut line = 1usize;
    let mut col = 1usize;
    for (i, c) in text.char_indices() {
        if i >= byte_idx {
            break;
        }
        if c == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

pub fn char_to_keystroke(c: char) -> Option<KeyStroke> {
    match c {
        ' ' => Some(KeyStroke {
            keycode: KEY_SPACE,
            shift: false,
        }),
        '\n' => Some(KeyStroke {
            keycode: KEY_ENTER,
            shift: false,
        }),
        'a'..='z' => Some(KeyStroke {
            keycode: LETTER_KEYCODES[(c as u8 - b'a') as usize],
            shift: false,
        }),
        'A'..='Z' => Some(KeyStroke {
            keycode: LETTER_KEYCODES[(c as u8 - b'A') as usize],
            shift: true,
        }),
        _ => PAIRED_KEYS
            .iter()
            .find_map(|&(plain, shifted, keycode)| {
                if c == plain {
                    Some(KeyStroke {
                        keycode,
                        shift: false,
                    })
                } else if c == shifted {
                    Some(KeyStroke {
                        keycode,
                        shift: true,
                    })
                } else {
                    None
                }
            }),
    }
}

/// Physically neighboring keys on a US-QWERTY layout, keyed by lowercase letter
/// or digit.
pub fn proximity_keys(c: char) -> Option<&'static [char]> {
    let neighbors: &'static [char] = match c.to_ascii_lowercase() {
        'a' => &['q', 'w', 's', 'z', 'x'],
        'b' => &['v', 'g', 'h', 'n'],
        'c' => &['x', 'd', 'f', 'v'],
        'd' => &['s', 'e', 'r', 'f', 'c', 'x'],
        'e' => &['w', 's', 'd', 'r'],
        'f' => &['d', 'r', 't', 'g', 'v', 'c'],
        'g' => &['f', 't', 'y', 'h', 'b', 'v'],
        'h' => &['g', 'y', 'u', 'j', 'n', 'b'],
        'i' => &['u', 'j', 'k', 'o'],
        'j' => &['h', 'u', 'i', 'k', 'm', 'n'],
        'k' => &['j', 'i', 'o', 'l', 'm'],
        'l' => &['k', 'o', 'p'],
        'm' => &['n', 'j', 'k'],
        'n' => &['b', 'h', 'j', 'm'],
        'o' => &['i', 'k', 'l', 'p'],
        'p' => &['o', 'l'],
        'q' => &['w', 'a'],
        'r' => &['e', 'd', 'f', 't'],
        's' => &['a', 'w', 'e', 'd', 'x', 'z'],
        't' => &['r', 'f', 'g', 'y'],
        'u' => &['y', 'h', 'j', 'i'],
        'v' => &['c', 'f', 'g', 'b'],
        'w' => &['q', 'a', 's', 'e'],
        'x' => &['z', 's', 'd', 'c'],
        'y' => &['t', 'g', 'h', 'u'],
        'z' => &['a', 's', 'x'],
        '1' => &['2', 'q'],
        '2' => &['1', '3', 'q', 'w'],
        '3' => &['2', '4', 'w', 'e'],
        '4' => &['3', '5', 'e', 'r'],
        '5' => &['4', '6', 'r', 't'],
        '6' => &['5', '7', 't', 'y'],
        '7' => &['6', '8', 'y', 'u'],
        '8' => &['7', '9', 'u', 'i'],
        '9' => &['8', '0', 'i', 'o'],
        '0' => &['9', 'o', 'p'],
        _ => return None,
    };
    Some(neighbors)
}

/// Pick a key next to `c`, keeping the case of `c` for letters.
pub fn adjacent_key(c: char, rng: &mut impl Rng) -> Option<char> {
    let neighbors = proximity_keys(c)?;
    let chosen = neighbors[rng.gen_range(0..neighbors.len())];
    Some(if c.is_ascii_uppercase() {
        chosen.to_ascii_uppercase()
    } else {
        chosen
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn letters_and_shifted_symbols_map_to_expected_keys() {
        assert_eq!(
            char_to_keystroke('q'),
            Some(KeyStroke {
                keycode: KEY_Q,
                shift: false
            })
        );
        assert_eq!(
            char_to_keystroke('Z'),
            Some(KeyStroke {
                keycode: KEY_Z,
                shift: true
            })
        );
        assert_eq!(
            char_to_keystroke('?'),
            Some(KeyStroke {
                keycode: KEY_SLASH,
                shift: true
            })
        );
        assert_eq!(char_to_keystroke('é'), None);
    }

    #[test]
    fn smart_quotes_are_typed_as_ascii() {
        assert_eq!(
            keystroke_for_output_char('’'),
            char_to_keystroke('\'')
        );
        assert!(is_typeable("It’s “fine”.\n"));
        assert!(!is_typeable("tab\there"));
    }

    #[test]
    fn unsupported_char_is_located_by_line_and_column() {
        let text = "ok\nbad\u{00e9}";
        let (idx, c) = find_first_unsupported_char(text).expect("should find é");
        assert_eq!(c, 'é');
        assert_eq!(byte_index_to_line_col(text, idx), (2, 4));
    }

    #[test]
    fn adjacent_key_keeps_case_and_stays_on_the_neighbor_list() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let lower = adjacent_key('g', &mut rng).expect("g has neighbors");
            assert!(proximity_keys('g').unwrap().contains(&lower));

            let upper = adjacent_key('G', &mut rng).expect("G has neighbors");
            assert!(upper.is_ascii_uppercase());
        }
        assert_eq!(adjacent_key('!', &mut rng), None);
    }
}
