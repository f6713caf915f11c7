//! Static keycode-to-name tables per keyboard layout.
//!
//! Letters map to lowercase single characters; modifiers and functional
//! keys use upper-snake names (`SPACE`, `BACKSPACE`, `LEFT_SHIFT`).
//! Unknown keycodes render as `KEY_<n>`.

/// Dense US layout table over the Linux evdev keycode space.
static US_KEY_NAMES: phf::Map<u16, &'static str> = phf::phf_map! {
    1u16 => "ESC",
    2u16 => "1",
    3u16 => "2",
    4u16 => "3",
    5u16 => "4",
    6u16 => "5",
    7u16 => "6",
    8u16 => "7",
    9u16 => "8",
    10u16 => "9",
    11u16 => "0",
    12u16 => "-",
    13u16 => "=",
    14u16 => "BACKSPACE",
    15u16 => "TAB",
    16u16 => "q",
    17u16 => "w",
    18u16 => "e",
    19u16 => "r",
    20u16 => "t",
    21u16 => "y",
    22u16 => "u",
    23u16 => "i",
    24u16 => "o",
    25u16 => "p",
    26u16 => "[",
    27u16 => "]",
    28u16 => "ENTER",
    29u16 => "LEFT_CTRL",
    30u16 => "a",
    31u16 => "s",
    32u16 => "d",
    33u16 => "f",
    34u16 => "g",
    35u16 => "h",
    36u16 => "j",
    37u16 => "k",
    38u16 => "l",
    39u16 => ";",
    40u16 => "'",
    41u16 => "`",
    42u16 => "LEFT_SHIFT",
    43u16 => "\\",
    44u16 => "z",
    45u16 => "x",
    46u16 => "c",
    47u16 => "v",
    48u16 => "b",
    49u16 => "n",
    50u16 => "m",
    51u16 => ",",
    52u16 => ".",
    53u16 => "/",
    54u16 => "RIGHT_SHIFT",
    55u16 => "KP_ASTERISK",
    56u16 => "LEFT_ALT",
    57u16 => "SPACE",
    58u16 => "CAPS_LOCK",
    59u16 => "F1",
    60u16 => "F2",
    61u16 => "F3",
    62u16 => "F4",
    63u16 => "F5",
    64u16 => "F6",
    65u16 => "F7",
    66u16 => "F8",
    67u16 => "F9",
    68u16 => "F10",
    69u16 => "NUM_LOCK",
    70u16 => "SCROLL_LOCK",
    71u16 => "KP_7",
    72u16 => "KP_8",
    73u16 => "KP_9",
    74u16 => "KP_MINUS",
    75u16 => "KP_4",
    76u16 => "KP_5",
    77u16 => "KP_6",
    78u16 => "KP_PLUS",
    79u16 => "KP_1",
    80u16 => "KP_2",
    81u16 => "KP_3",
    82u16 => "KP_0",
    83u16 => "KP_DOT",
    87u16 => "F11",
    88u16 => "F12",
    96u16 => "KP_ENTER",
    97u16 => "RIGHT_CTRL",
    98u16 => "KP_SLASH",
    99u16 => "SYSRQ",
    100u16 => "RIGHT_ALT",
    102u16 => "HOME",
    103u16 => "UP",
    104u16 => "PAGE_UP",
    105u16 => "LEFT",
    106u16 => "RIGHT",
    107u16 => "END",
    108u16 => "DOWN",
    109u16 => "PAGE_DOWN",
    110u16 => "INSERT",
    111u16 => "DELETE",
    119u16 => "PAUSE",
    125u16 => "LEFT_META",
    126u16 => "RIGHT_META",
    127u16 => "COMPOSE",
};

/// German layout differences relative to US (QWERTZ swap, umlaut row).
/// Keys absent here fall through to the US table.
static DE_KEY_NAMES: phf::Map<u16, &'static str> = phf::phf_map! {
    12u16 => "ß",
    13u16 => "´",
    21u16 => "z",
    26u16 => "ü",
    27u16 => "+",
    39u16 => "ö",
    40u16 => "ä",
    41u16 => "^",
    43u16 => "#",
    44u16 => "y",
    51u16 => ",",
    52u16 => ".",
    53u16 => "-",
    86u16 => "<",
};

/// Resolves a keycode to its printable name under the given layout.
///
/// Unsupported layouts fall back to `us`; keycodes with no table entry
/// render as `KEY_<n>`.
pub fn get_key_name(keycode: u16, layout: &str) -> String {
    let name = if layout == "de" {
        DE_KEY_NAMES
            .get(&keycode)
            .or_else(|| US_KEY_NAMES.get(&keycode))
    } else {
        US_KEY_NAMES.get(&keycode)
    };
    match name {
        Some(n) => (*n).to_string(),
        None => format!("KEY_{keycode}"),
    }
}

/// A layout is supported iff a keycode table exists for it.
#[inline]
pub fn is_supported_layout(layout: &str) -> bool {
    matches!(layout, "us" | "de")
}

/// True for single alphabetic code points, including language-specific
/// letters (`ä`, `ö`, `ü`, `ß`).
#[inline]
pub fn is_letter_key(name: &str) -> bool {
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => c.is_alphabetic(),
        _ => false,
    }
}

/// Linux evdev keycode for BACKSPACE; used by the burst detector and the
/// word segmenter to recognize corrections without a name lookup.
pub const KEY_BACKSPACE: u16 = 14;
