//! Character to USB HID keyboard usage mapping
//!
//! Reference: USB HID Usage Tables 1.12, Section 10 (Keyboard/Keypad Page).
//!
//! Only letters, digits, space and Enter are mapped. Punctuation and other
//! characters produce no report; their usage codes depend on the host's
//! keyboard layout and are left out on purpose.

use super::types::{modifiers, KeyStroke};

/// USB HID key codes (Usage Page 0x07)
pub mod usb {
    // Letters A-Z (0x04 - 0x1D)
    pub const KEY_A: u8 = 0x04;
    pub const KEY_Z: u8 = 0x1D;

    // Numbers 1-9, 0 (0x1E - 0x27)
    pub const KEY_1: u8 = 0x1E;
    pub const KEY_9: u8 = 0x26;
    pub const KEY_0: u8 = 0x27;

    // Control keys
    pub const KEY_ENTER: u8 = 0x28;
    pub const KEY_SPACE: u8 = 0x2C;
}

/// ASCII code minus this offset gives the usage code of a lowercase letter
const LETTER_OFFSET: u8 = b'a' - usb::KEY_A; // 93

/// ASCII code minus this offset gives the usage code of digits 1-9
const DIGIT_OFFSET: u8 = b'1' - usb::KEY_1; // 19

/// Encode a typed character as a key stroke
///
/// Returns `None` for characters without a mapping; nothing should be sent
/// to the device for those.
pub fn encode(ch: char) -> Option<KeyStroke> {
    if !ch.is_ascii() {
        return None;
    }
    let code = ch as u8;

    match ch {
        'a'..='z' => Some(KeyStroke::new(0, code - LETTER_OFFSET)),
        'A'..='Z' => Some(KeyStroke::new(
            modifiers::LEFT_SHIFT,
            code.to_ascii_lowercase() - LETTER_OFFSET,
        )),
        '1'..='9' => Some(KeyStroke::new(0, code - DIGIT_OFFSET)),
        // '0' comes after '9' on the keyboard's number row
        '0' => Some(KeyStroke::new(0, usb::KEY_0)),
        // Non-canonical terminals may deliver CR for Return
        '\n' | '\r' => Some(KeyStroke::new(0, usb::KEY_ENTER)),
        ' ' => Some(KeyStroke::new(0, usb::KEY_SPACE)),
        _ => None,
    }
}

/// Encode a raw input byte (as read from the terminal)
pub fn encode_byte(byte: u8) -> Option<KeyStroke> {
    encode(byte as char)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letters() {
        assert_eq!(encode('a').unwrap().keycode(), usb::KEY_A);
        assert_eq!(encode('z').unwrap().keycode(), usb::KEY_Z);
        assert_eq!(encode('h').unwrap().keycode(), 0x0B);
        assert_eq!(encode('a').unwrap().modifiers(), 0);
    }

    #[test]
    fn test_uppercase_uses_shift_and_same_keycode() {
        for (upper, lower) in ('A'..='Z').zip('a'..='z') {
            let u = encode(upper).unwrap();
            let l = encode(lower).unwrap();
            assert_eq!(u.keycode(), l.keycode());
            assert_eq!(u.modifiers() & modifiers::LEFT_SHIFT, modifiers::LEFT_SHIFT);
        }
    }

    #[test]
    fn test_digits_follow_number_row() {
        assert_eq!(encode('1').unwrap().keycode(), usb::KEY_1);
        assert_eq!(encode('9').unwrap().keycode(), usb::KEY_9);
        assert_eq!(encode('0').unwrap().keycode(), usb::KEY_0);
        let row: Vec<u8> = "1234567890".chars().map(|c| encode(c).unwrap().keycode()).collect();
        assert_eq!(row, (30..=39).collect::<Vec<u8>>());
    }

    #[test]
    fn test_enter_and_space() {
        assert_eq!(encode('\n').unwrap().keycode(), 40);
        assert_eq!(encode('\r').unwrap().keycode(), 40);
        assert_eq!(encode(' ').unwrap().keycode(), 44);
    }

    #[test]
    fn test_supported_chars_yield_press_and_release() {
        let supported = ('a'..='z')
            .chain('A'..='Z')
            .chain('0'..='9')
            .chain(['\n', ' ']);
        for ch in supported {
            let reports = encode(ch).unwrap().reports();
            assert_eq!(reports.len(), 2);
            assert_eq!(reports[0].to_bytes().len(), 8);
            assert!(!reports[0].is_empty(), "{:?}", ch);
            assert_eq!(reports[1].to_bytes(), [0u8; 8]);
        }
    }

    #[test]
    fn test_unsupported_chars_are_dropped() {
        for ch in ['!', '.', '-', '\t', '\x1b', 'é', '\u{7f}'] {
            assert!(encode(ch).is_none(), "{:?}", ch);
        }
        assert!(encode_byte(0x1d).is_none());
    }
}
