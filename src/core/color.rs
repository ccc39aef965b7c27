//! Color resolution between abstract color ids and concrete RGB.
//!
//! Screen cells carry a [`ColorId`]; the renderer resolves it against the
//! session's [`Palette`]. Scrollback stores colors in a single byte, so
//! truecolor values are compacted to the nearest xterm-256 entry on the way in.
//! The two directions are not inverses: history is close, not exact.

/// Raw sentinel for the session default foreground
pub const RAW_DEFAULT_FG: i32 = -1;
/// Raw sentinel for the session default background
pub const RAW_DEFAULT_BG: i32 = -2;
/// Tag marking a packed 24-bit truecolor value
pub const RAW_TRUECOLOR_TAG: i32 = 0x0100_0000;

/// Channel levels of the xterm 6x6x6 color cube
pub const CUBE_LEVELS: [u8; 6] = [0, 95, 135, 175, 215, 255];

/// Tango palette for the 16 ANSI colors
pub const TANGO: [Rgb; 16] = [
    Rgb::from_u32(0x000000),
    Rgb::from_u32(0xCC0000),
    Rgb::from_u32(0x4E9A06),
    Rgb::from_u32(0xC4A000),
    Rgb::from_u32(0x3465A4),
    Rgb::from_u32(0x75507B),
    Rgb::from_u32(0x06989A),
    Rgb::from_u32(0xD3D7CF),
    Rgb::from_u32(0x555753),
    Rgb::from_u32(0xEF2929),
    Rgb::from_u32(0x8AE234),
    Rgb::from_u32(0xFCE94F),
    Rgb::from_u32(0x739FCF),
    Rgb::from_u32(0xAD7FA8),
    Rgb::from_u32(0x34E2E2),
    Rgb::from_u32(0xEEEEEC),
];

/// Abstract color identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ColorId {
    /// Session default foreground
    #[default]
    DefaultFg,
    /// Session default background
    DefaultBg,
    /// Palette index (0-15) or xterm-256 index (16-255)
    Indexed(u8),
    /// 24-bit color
    Truecolor(u8, u8, u8),
}

impl ColorId {
    /// Encode into the integer form kept by persisted scrollback
    pub fn to_raw(self) -> i32 {
        match self {
            ColorId::DefaultFg => RAW_DEFAULT_FG,
            ColorId::DefaultBg => RAW_DEFAULT_BG,
            ColorId::Indexed(i) => i as i32,
            ColorId::Truecolor(r, g, b) => {
                RAW_TRUECOLOR_TAG | ((r as i32) << 16) | ((g as i32) << 8) | (b as i32)
            }
        }
    }

    /// Decode the integer form. Any value above 255 is truecolor.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            RAW_DEFAULT_FG => Some(ColorId::DefaultFg),
            RAW_DEFAULT_BG => Some(ColorId::DefaultBg),
            0..=255 => Some(ColorId::Indexed(raw as u8)),
            v if v > 255 => Some(ColorId::Truecolor(
                ((v >> 16) & 0xFF) as u8,
                ((v >> 8) & 0xFF) as u8,
                (v & 0xFF) as u8,
            )),
            _ => None,
        }
    }

    pub fn is_default(self) -> bool {
        matches!(self, ColorId::DefaultFg | ColorId::DefaultBg)
    }
}

/// Concrete RGB color
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Build from a 0xRRGGBB value
    pub const fn from_u32(v: u32) -> Self {
        Self {
            r: ((v >> 16) & 0xFF) as u8,
            g: ((v >> 8) & 0xFF) as u8,
            b: (v & 0xFF) as u8,
        }
    }

    /// Parse `RRGGBB` or `#RRGGBB`
    pub fn parse_hex(s: &str) -> Option<Self> {
        let s = s.trim();
        let s = s.strip_prefix('#').unwrap_or(s);
        if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        u32::from_str_radix(s, 16).ok().map(Self::from_u32)
    }

    pub fn to_hex(self) -> String {
        format!("{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    /// Convert to crossterm Color
    pub fn to_crossterm(self) -> crossterm::style::Color {
        crossterm::style::Color::Rgb {
            r: self.r,
            g: self.g,
            b: self.b,
        }
    }

    /// Largest per-channel difference
    pub fn max_channel_distance(self, other: Rgb) -> u8 {
        self.r
            .abs_diff(other.r)
            .max(self.g.abs_diff(other.g))
            .max(self.b.abs_diff(other.b))
    }
}

/// A session's active colors
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Palette {
    pub ansi: [Rgb; 16],
    pub fg: Rgb,
    pub bg: Rgb,
    pub cursor: Rgb,
}

impl Default for Palette {
    fn default() -> Self {
        Self::dark()
    }
}

impl Palette {
    pub fn dark() -> Self {
        Self {
            ansi: TANGO,
            fg: Rgb::from_u32(0xEEEEEC),
            bg: Rgb::from_u32(0x000000),
            cursor: Rgb::from_u32(0xEEEEEC),
        }
    }

    pub fn light() -> Self {
        Self {
            ansi: TANGO,
            fg: Rgb::from_u32(0x000000),
            bg: Rgb::from_u32(0xFFFFFF),
            cursor: Rgb::from_u32(0x000000),
        }
    }

    /// Get a built-in theme by name
    pub fn by_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "dark" | "tango" | "default" => Some(Self::dark()),
            "light" => Some(Self::light()),
            _ => None,
        }
    }

    /// List built-in themes
    pub fn names() -> &'static [&'static str] {
        &["dark", "light"]
    }
}

/// Resolve a color id to RGB against a palette
pub fn resolve(id: ColorId, palette: &Palette) -> Rgb {
    match id {
        ColorId::DefaultFg => palette.fg,
        ColorId::DefaultBg => palette.bg,
        ColorId::Indexed(i) => xterm256_to_rgb(i, palette),
        ColorId::Truecolor(r, g, b) => Rgb::new(r, g, b),
    }
}

/// Map an xterm-256 index to RGB. The first 16 come from the palette.
pub fn xterm256_to_rgb(index: u8, palette: &Palette) -> Rgb {
    match index {
        0..=15 => palette.ansi[index as usize],
        16..=231 => {
            let v = (index - 16) as usize;
            Rgb::new(
                CUBE_LEVELS[v / 36],
                CUBE_LEVELS[(v / 6) % 6],
                CUBE_LEVELS[v % 6],
            )
        }
        _ => {
            let gray = 8 + 10 * (index - 232);
            Rgb::new(gray, gray, gray)
        }
    }
}

/// Nearest cube level for one channel
fn cube_index(c: u8) -> u8 {
    if c < 48 {
        0
    } else {
        ((c - 35) / 40).clamp(1, 5)
    }
}

/// Compact an RGB color into an xterm-256 index (16-255)
pub fn compact(rgb: Rgb) -> u8 {
    let Rgb { r, g, b } = rgb;
    if r == g && g == b {
        return if r < 8 {
            16
        } else if r > 248 {
            231
        } else {
            232 + ((r - 8) / 10).min(23)
        };
    }
    16 + 36 * cube_index(r) + 6 * cube_index(g) + cube_index(b)
}

/// Compact a color id into one byte, or `None` for the default sentinels
pub fn compact_id(id: ColorId) -> Option<u8> {
    match id {
        ColorId::DefaultFg | ColorId::DefaultBg => None,
        ColorId::Indexed(i) => Some(i),
        ColorId::Truecolor(r, g, b) => Some(compact(Rgb::new(r, g, b))),
    }
}

/// Bold text on one of the first 8 colors uses the bright variant
pub fn promote_bold(id: ColorId) -> ColorId {
    match id {
        ColorId::Indexed(i) if i < 8 => ColorId::Indexed(i + 8),
        other => other,
    }
}

/// Resolve the drawing colors of one cell
pub fn cell_rgb(
    fg: ColorId,
    bg: ColorId,
    bold: bool,
    reverse: bool,
    palette: &Palette,
    bold_is_bright: bool,
) -> (Rgb, Rgb) {
    let fg = if bold && bold_is_bright { promote_bold(fg) } else { fg };
    let (fg, bg) = if reverse { (bg, fg) } else { (fg, bg) };
    (resolve(fg, palette), resolve(bg, palette))
}
