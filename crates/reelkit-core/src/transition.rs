use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The eleven compositing functions a transition can use.
///
/// Each kind maps to exactly one compositor program; switching kinds always
/// rebuilds the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionKind {
    /// Linear cross-dissolve.
    Fade,
    /// Hard switch once progress passes 0.5.
    Cut,
    /// Per-pixel pseudo-random threshold dissolve.
    #[default]
    Dissolve,
    /// Horizontal wipe, the boundary sits at `1 - progress` of the width.
    Slide,
    /// Row-delayed wipe with a sinusoidal distortion band.
    Liquid,
    /// Dissolve with horizontal row jitter mid-transition.
    Glitch,
    /// Mosaic that coarsens towards the midpoint.
    Pixelate,
    /// Rotational warp around the center.
    Swirl,
    /// Hard switch with a bloom towards white.
    Flash,
    /// Eight-tap radial blur.
    ZoomBlur,
    /// Mirrored polar segments.
    Kaleido,
}

impl TransitionKind {
    pub const ALL: [TransitionKind; 11] = [
        TransitionKind::Fade,
        TransitionKind::Cut,
        TransitionKind::Dissolve,
        TransitionKind::Slide,
        TransitionKind::Liquid,
        TransitionKind::Glitch,
        TransitionKind::Pixelate,
        TransitionKind::Swirl,
        TransitionKind::Flash,
        TransitionKind::ZoomBlur,
        TransitionKind::Kaleido,
    ];

    /// Stable name used in config files and asset metadata.
    pub fn name(&self) -> &'static str {
        match self {
            TransitionKind::Fade => "fade",
            TransitionKind::Cut => "cut",
            TransitionKind::Dissolve => "dissolve",
            TransitionKind::Slide => "slide",
            TransitionKind::Liquid => "liquid",
            TransitionKind::Glitch => "glitch",
            TransitionKind::Pixelate => "pixelate",
            TransitionKind::Swirl => "swirl",
            TransitionKind::Flash => "flash",
            TransitionKind::ZoomBlur => "zoom-blur",
            TransitionKind::Kaleido => "kaleido",
        }
    }

    /// Parse a transition name, falling back to [`TransitionKind::Dissolve`]
    /// for anything unrecognised.
    pub fn from_name_or_default(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            tracing::warn!("unknown transition '{}', using dissolve", name);
            TransitionKind::Dissolve
        })
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown transition '{0}'")]
pub struct UnknownTransition(pub String);

impl FromStr for TransitionKind {
    type Err = UnknownTransition;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        TransitionKind::ALL
            .iter()
            .copied()
            .find(|k| k.name() == needle)
            .ok_or_else(|| UnknownTransition(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for kind in TransitionKind::ALL {
            assert_eq!(kind.name().parse::<TransitionKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_unknown_falls_back_to_dissolve() {
        assert_eq!(
            TransitionKind::from_name_or_default("star-wipe"),
            TransitionKind::Dissolve
        );
        assert_eq!(
            TransitionKind::from_name_or_default("Zoom-Blur"),
            TransitionKind::ZoomBlur
        );
    }

    #[test]
    fn test_serde_uses_kebab_case() {
        let json = serde_json::to_string(&TransitionKind::ZoomBlur).unwrap();
        assert_eq!(json, "\"zoom-blur\"");
        let back: TransitionKind = serde_json::from_str("\"kaleido\"").unwrap();
        assert_eq!(back, TransitionKind::Kaleido);
    }
}
