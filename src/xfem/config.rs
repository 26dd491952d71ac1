use std::str::FromStr;

use crate::contact::ConfigError;
use crate::math::Real;

/// How the quadrature weights of a cut element are adjusted to its physical fragment.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum XfemQRule {
    /// Every weight is scaled by the physical volume fraction.
    #[default]
    Volfrac,
    /// The weights reproduce the low-order moments of the physical fragment.
    ///
    /// Only available for 2D elements with at most six quadrature points. Other elements
    /// fall back to [`XfemQRule::Volfrac`].
    MomentFitting,
    /// Quadrature points outside the physical fragment get a zero weight.
    Direct,
}

impl FromStr for XfemQRule {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "volfrac" => Ok(XfemQRule::Volfrac),
            "moment_fitting" => Ok(XfemQRule::MomentFitting),
            "direct" => Ok(XfemQRule::Direct),
            _ => Err(ConfigError::UnknownQRule(s.to_string())),
        }
    }
}

/// Parameters of the mesh-cut orchestrator.
///
/// The crack-extension thresholds are tuned heuristics rather than physical constants, which
/// is why they are exposed here.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct XfemConfig {
    /// The quadrature rule of cut elements.
    pub qrule: XfemQRule,
    /// Extend state-marked cracks by a fixed length instead of across the whole element.
    pub use_crack_growth_increment: bool,
    /// The crack extension length used with `use_crack_growth_increment`.
    pub crack_growth_increment: Real,
    /// Largest angle, in degrees, between the previous crack direction and its extension.
    pub max_extension_angle: Real,
    /// Cut positions are clamped to `[min_cut_position, 1 - min_cut_position]` along an edge.
    pub min_cut_position: Real,
    /// Elements whose physical volume fraction is below this value are not cut by state.
    pub min_volume_fraction: Real,
    /// Let the children of an element also share the phantom nodes of its uncut edges.
    pub merge_phantom_edges: bool,
}

impl Default for XfemConfig {
    fn default() -> Self {
        Self {
            qrule: XfemQRule::Volfrac,
            use_crack_growth_increment: false,
            crack_growth_increment: 0.1,
            max_extension_angle: 45.0,
            min_cut_position: 0.05,
            min_volume_fraction: 0.25,
            merge_phantom_edges: true,
        }
    }
}

impl XfemConfig {
    /// Clamps a cut position away from the edge end points.
    pub fn clamp_cut_position(&self, position: Real) -> Real {
        position.clamp(self.min_cut_position, 1.0 - self.min_cut_position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qrule_names() {
        assert_eq!("volfrac".parse(), Ok(XfemQRule::Volfrac));
        assert_eq!("MOMENT_FITTING".parse(), Ok(XfemQRule::MomentFitting));
        assert_eq!("direct".parse(), Ok(XfemQRule::Direct));
        assert!(matches!(
            "gauss".parse::<XfemQRule>(),
            Err(ConfigError::UnknownQRule(_))
        ));
    }

    #[test]
    fn cut_positions_stay_away_from_vertices() {
        let config = XfemConfig::default();
        assert_eq!(config.clamp_cut_position(0.01), 0.05);
        assert_eq!(config.clamp_cut_position(0.5), 0.5);
        assert_eq!(config.clamp_cut_position(0.99), 0.95);
    }
}
