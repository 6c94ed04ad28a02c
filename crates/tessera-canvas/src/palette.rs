//! The fixed 32-entry placement palette
//!
//! Every placement carries a palette index; target pixels are matched
//! against canvas pixels by their exact ARGB value.

use serde::{Deserialize, Serialize};

macro_rules! palette {
    ($($name:ident = ($argb:expr, $index:expr)),+ $(,)?) => {
        /// Legal placement colour
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum Color {
            $(
                #[allow(missing_docs)]
                $name,
            )+
        }

        impl Color {
            /// Every palette entry in index order
            pub const ALL: [Color; 32] = [$(Color::$name),+];

            /// Opaque ARGB value of this colour
            #[inline]
            #[must_use]
            pub const fn argb(self) -> u32 {
                match self {
                    $(Color::$name => $argb,)+
                }
            }

            /// Palette index sent with a placement
            #[inline]
            #[must_use]
            pub const fn index(self) -> u8 {
                match self {
                    $(Color::$name => $index,)+
                }
            }
        }
    };
}

palette! {
    DarkestRed = (0xFF6D_001A, 0),
    DarkRed = (0xFFBE_0039, 1),
    Red = (0xFFFF_4500, 2),
    Orange = (0xFFFF_A800, 3),
    Yellow = (0xFFFF_D635, 4),
    PaleYellow = (0xFFFF_F8B8, 5),
    DarkGreen = (0xFF00_A368, 6),
    Green = (0xFF00_CC78, 7),
    LightGreen = (0xFF7E_ED56, 8),
    DarkTeal = (0xFF00_756F, 9),
    Teal = (0xFF00_9EAA, 10),
    LightTeal = (0xFF00_CC00, 11),
    DarkBlue = (0xFF24_50A4, 12),
    Blue = (0xFF36_90EA, 13),
    LightBlue = (0xFF51_E9F4, 14),
    Indigo = (0xFF49_3AC1, 15),
    Periwinkle = (0xFF6A_5CFF, 16),
    Lavender = (0xFF94_B3FF, 17),
    DarkPurple = (0xFF81_1E9F, 18),
    Purple = (0xFFB4_4AC0, 19),
    PalePurple = (0xFFE4_ABFF, 20),
    Magenta = (0xFFDE_107F, 21),
    Pink = (0xFFFF_3881, 22),
    LightPink = (0xFFFF_99AA, 23),
    DarkBrown = (0xFF6D_482F, 24),
    Brown = (0xFF9C_6926, 25),
    Beige = (0xFFFF_B470, 26),
    Black = (0xFF00_0000, 27),
    DarkGray = (0xFF51_5252, 28),
    Gray = (0xFF89_8D90, 29),
    LightGray = (0xFFD4_D7D9, 30),
    White = (0xFFFF_FFFF, 31),
}

impl Color {
    /// Look up the palette entry with exactly this ARGB value
    #[must_use]
    pub fn from_argb(argb: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.argb() == argb)
    }

    /// Look up the palette entry with this index
    #[inline]
    #[must_use]
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index)).copied()
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}(#{:06X})", self, self.argb() & 0x00FF_FFFF)
    }
}
