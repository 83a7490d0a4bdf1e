//! HID report types

/// Keyboard modifier bits (report byte 0)
pub mod modifiers {
    pub const LEFT_CTRL: u8 = 0x01;
    pub const LEFT_SHIFT: u8 = 0x02;
    pub const LEFT_ALT: u8 = 0x04;
    pub const LEFT_GUI: u8 = 0x08;
    pub const RIGHT_CTRL: u8 = 0x10;
    pub const RIGHT_SHIFT: u8 = 0x20;
    pub const RIGHT_ALT: u8 = 0x40;
    pub const RIGHT_GUI: u8 = 0x80;
}

/// USB HID boot keyboard input report (8 bytes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyboardReport {
    /// Modifier byte
    pub modifiers: u8,
    /// Reserved byte
    pub reserved: u8,
    /// Key codes (up to 6 simultaneous keys)
    pub keys: [u8; 6],
}

impl KeyboardReport {
    /// Report with a single key held
    pub fn key(modifiers: u8, key: u8) -> Self {
        Self {
            modifiers,
            reserved: 0,
            keys: [key, 0, 0, 0, 0, 0],
        }
    }

    /// All keys released
    pub fn release() -> Self {
        Self::default()
    }

    /// Convert to bytes for USB HID
    pub fn to_bytes(&self) -> [u8; 8] {
        [
            self.modifiers,
            self.reserved,
            self.keys[0],
            self.keys[1],
            self.keys[2],
            self.keys[3],
            self.keys[4],
            self.keys[5],
        ]
    }

    /// Whether no key or modifier is held
    pub fn is_empty(&self) -> bool {
        self.modifiers == 0 && self.keys.iter().all(|&k| k == 0)
    }
}

/// One typed character: a key press followed by the release of all keys
///
/// Boot keyboards report only the keys currently held, so without the
/// release report the host would see the key as stuck.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStroke {
    pub press: KeyboardReport,
    pub release: KeyboardReport,
}

impl KeyStroke {
    pub fn new(modifiers: u8, key: u8) -> Self {
        Self {
            press: KeyboardReport::key(modifiers, key),
            release: KeyboardReport::release(),
        }
    }

    /// Reports in the order they are written to the device
    pub fn reports(&self) -> [KeyboardReport; 2] {
        [self.press, self.release]
    }

    /// Key code of the pressed key
    pub fn keycode(&self) -> u8 {
        self.press.keys[0]
    }

    pub fn modifiers(&self) -> u8 {
        self.press.modifiers
    }
}
