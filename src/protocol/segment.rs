//! Character sets for text cells

/// Blank glyph for both ASCII displays and 7-segment digits
pub const BLANK: u8 = 0x20;

/// Glyphs for 0, 1 and 2 dashes on a 7-segment digit.
///
/// Entries 1 and 2 look swapped; the hardware renders them this way.
pub const DASH_GLYPHS: [u8; 3] = [BLANK, 0x3D, 0x2D];

/// Printable ASCII passes through, anything else becomes a blank
pub fn ascii_glyph(ch: char) -> u8 {
    if (' '..='~').contains(&ch) {
        ch as u8
    } else {
        BLANK
    }
}

/// Mackie 7-segment code: `@`..`_` map to 0x00..0x1F, space..`?` stay as is,
/// lowercase is shown as uppercase
pub fn segment_code(ch: char) -> u8 {
    let ch = ch.to_ascii_uppercase();
    match ch {
        '@'..='_' => ch as u8 - 0x40,
        ' '..='?' => ch as u8,
        _ => BLANK,
    }
}

/// Glyph showing `count` dashes; counts above 2 show two
pub fn dash_glyph(count: u8) -> u8 {
    DASH_GLYPHS[(count as usize).min(DASH_GLYPHS.len() - 1)]
}
