pub const DEFAULT_STEP: f64 = 0.05;

const SNAP: f64 = 1e9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Scrolling towards the user (positive `deltaY`) lowers the volume.
    pub fn from_wheel(delta_y: f64) -> Self {
        if delta_y > 0.0 {
            Self::Down
        } else {
            Self::Up
        }
    }

    fn sign(self) -> f64 {
        match self {
            Self::Up => 1.0,
            Self::Down => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Mute,
    Low,
    Medium,
    High,
    Max,
}

const TIERS: [(Tier, f64); 5] = [
    (Tier::Mute, 0.0),
    (Tier::Low, 0.15),
    (Tier::Medium, 0.33),
    (Tier::High, 0.63),
    (Tier::Max, 1.0),
];

impl Tier {
    pub fn name(self) -> &'static str {
        match self {
            Self::Mute => "mute",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Max => "max",
        }
    }
}

pub fn clamp(level: f64) -> f64 {
    if level.is_nan() {
        return 0.0;
    }
    level.clamp(0.0, 1.0)
}

pub fn step(current: f64, direction: Direction, step_size: f64) -> f64 {
    let next = clamp(clamp(current) + direction.sign() * step_size);
    // keeps 0.10 + 0.05 equal to the 0.15 band boundary
    (next * SNAP).round() / SNAP
}

pub fn tier(level: f64) -> Tier {
    let level = clamp(level);
    TIERS
        .iter()
        .find(|(_, max)| level <= *max)
        .map_or(Tier::Max, |(tier, _)| *tier)
}

pub fn percent(level: f64) -> u8 {
    (clamp(level) * 100.0).round() as u8
}
