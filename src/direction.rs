use crate::core::Vec2;

/// Discrete 8-way compass choice plus a neutral "no motion" option, as
/// offered by a direction-selection UI next to a completed mask.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Compass {
    #[default]
    Up,
    Down,
    Left,
    Right,
    UpLeft,
    UpRight,
    DownLeft,
    DownRight,
    None,
}

/// Diagonal axis component, approximating unit length (0.7^2 + 0.7^2 ~= 1).
const DIAG: f64 = 0.7;

impl Compass {
    /// Unit-scaled velocity vector in raster coordinates (y grows downward).
    pub fn velocity(self) -> Vec2 {
        match self {
            Compass::Up => Vec2::new(0.0, -1.0),
            Compass::Down => Vec2::new(0.0, 1.0),
            Compass::Left => Vec2::new(-1.0, 0.0),
            Compass::Right => Vec2::new(1.0, 0.0),
            Compass::UpLeft => Vec2::new(-DIAG, -DIAG),
            Compass::UpRight => Vec2::new(DIAG, -DIAG),
            Compass::DownLeft => Vec2::new(-DIAG, DIAG),
            Compass::DownRight => Vec2::new(DIAG, DIAG),
            Compass::None => Vec2::ZERO,
        }
    }

    /// Lookup by UI key. Unrecognized keys fall back to `Up` rather than
    /// failing; direction selection never errors.
    pub fn from_key(key: &str) -> Self {
        match key {
            "up" => Compass::Up,
            "down" => Compass::Down,
            "left" => Compass::Left,
            "right" => Compass::Right,
            "up-left" => Compass::UpLeft,
            "up-right" => Compass::UpRight,
            "down-left" => Compass::DownLeft,
            "down-right" => Compass::DownRight,
            "none" => Compass::None,
            _ => Compass::Up,
        }
    }
}
