use std::str::FromStr;

use crate::contact::ConfigError;
use crate::math::{Real, TOLERANCE};
use crate::utils::FUZZY_TOLERANCE;

/// The physical behavior of the contact interface.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum ContactModel {
    /// Normal contact only.
    #[default]
    Frictionless,
    /// The surfaces are tied together once in contact.
    Glued,
    /// Coulomb friction.
    Coulomb,
    /// Coulomb friction driven by the frictional-slip controller. The contact force update
    /// is the one of [`ContactModel::Coulomb`].
    CoulombMp,
}

impl ContactModel {
    /// Is this one of the Coulomb friction models?
    pub fn is_coulomb(self) -> bool {
        matches!(self, ContactModel::Coulomb | ContactModel::CoulombMp)
    }
}

impl FromStr for ContactModel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "frictionless" => Ok(ContactModel::Frictionless),
            "glued" => Ok(ContactModel::Glued),
            "coulomb" => Ok(ContactModel::Coulomb),
            "coulomb_mp" => Ok(ContactModel::CoulombMp),
            _ => Err(ConfigError::UnknownModel(s.to_string())),
        }
    }
}

/// How the contact constraint is enforced.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum ContactFormulation {
    /// Kinematic enforcement from the nodal residual.
    #[default]
    Kinematic,
    /// Penalty enforcement.
    Penalty,
    /// Augmented Lagrangian enforcement.
    AugmentedLagrange,
    /// Kinematic normal enforcement with a tangential penalty.
    TangentialPenalty,
}

impl FromStr for ContactFormulation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kinematic" | "default" => Ok(ContactFormulation::Kinematic),
            "penalty" => Ok(ContactFormulation::Penalty),
            "augmented_lagrange" => Ok(ContactFormulation::AugmentedLagrange),
            "tangential_penalty" => Ok(ContactFormulation::TangentialPenalty),
            _ => Err(ConfigError::UnknownFormulation(s.to_string())),
        }
    }
}

/// How contact normals are smoothed across face boundaries.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum NormalSmoothingMethod {
    /// Blend with the normals of the neighboring faces near edges and corners.
    EdgeBased,
    /// Interpolate a nodal normal field supplied by the host.
    NodalNormalBased,
}

impl FromStr for NormalSmoothingMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "edge_based" => Ok(NormalSmoothingMethod::EdgeBased),
            "nodal_normal_based" => Ok(NormalSmoothingMethod::NodalNormalBased),
            _ => Err(ConfigError::UnknownSmoothingMethod(s.to_string())),
        }
    }
}

/// Parameters of the contact-point projector.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct ProjectionOptions {
    /// Distance a projection may fall off a face and still count as on the face.
    pub tangential_tolerance: Real,
    /// Maximum number of linearized least-squares steps.
    pub max_least_squares_iterations: usize,
    /// Update size below which the least-squares phase stops.
    pub least_squares_tolerance: Real,
    /// Maximum number of Newton iterations.
    pub max_newton_iterations: usize,
    /// Update size below which the Newton iteration has converged.
    pub newton_tolerance: Real,
    /// Smallest step scale of the backtracking line search.
    pub min_line_search_step: Real,
}

impl Default for ProjectionOptions {
    fn default() -> Self {
        ProjectionOptions {
            tangential_tolerance: 0.0,
            max_least_squares_iterations: 3,
            least_squares_tolerance: TOLERANCE * 1.0e3,
            max_newton_iterations: 25,
            newton_tolerance: TOLERANCE * TOLERANCE * 1.0e3,
            min_line_search_step: 1.0e-6,
        }
    }
}

/// Parameters of the contact search pass.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct LocatorConfig {
    /// Parameters of the projector.
    pub projection: ProjectionOptions,
    /// Re-project nodes that already have a contact record. Glued contact disables this.
    pub update_location: bool,
    /// Skip candidate faces failing a cheap bounding test before projecting on them.
    pub check_whether_reasonable: bool,
    /// Relative tolerance of the distance comparison breaking ties between candidates.
    pub tie_break_tolerance: Real,
    /// The normal smoothing method, if any.
    pub normal_smoothing_method: Option<NormalSmoothingMethod>,
    /// Width of the smoothing band along face edges, in reference units.
    pub normal_smoothing_distance: Real,
    /// Number of primary nodes in the patch of each secondary node.
    pub patch_size: usize,
    /// Number of secondary nodes processed by one worker.
    pub partition_size: usize,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        LocatorConfig {
            projection: ProjectionOptions::default(),
            update_location: true,
            check_whether_reasonable: true,
            tie_break_tolerance: FUZZY_TOLERANCE,
            normal_smoothing_method: None,
            normal_smoothing_distance: 0.0,
            patch_size: 8,
            partition_size: 64,
        }
    }
}

/// Parameters of the mechanical contact constraint.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct ContactConfig {
    /// The contact model.
    pub model: ContactModel,
    /// The enforcement formulation.
    pub formulation: ContactFormulation,
    /// The penalty stiffness.
    pub penalty: Real,
    /// The tangential penalty stiffness. Defaults to `penalty`.
    pub tangential_penalty: Option<Real>,
    /// Growth factor of the penalty at each augmented Lagrangian iteration.
    pub penalty_multiplier: Real,
    /// Multiply the penalty by the nodal area.
    pub normalize_penalty: bool,
    /// The Coulomb friction coefficient.
    pub friction_coefficient: Real,
    /// Distance a projection may fall off a face and still count as on the face.
    pub tangential_tolerance: Real,
    /// Normal distance from the surface within which nodes are captured.
    pub capture_tolerance: Real,
    /// Tensile load above which a node in contact is released. Negative disables release.
    pub tension_release: Real,
    /// Number of stick/slip switches after which a node is locked in the sticking state.
    pub stick_lock_iterations: u32,
    /// Factor by which the frictional capacity must be exceeded to unlock a stick-locked node.
    pub stick_unlock_factor: Real,
    /// Penetration tolerance of the augmented Lagrangian formulation.
    pub al_penetration_tolerance: Option<Real>,
    /// Incremental slip tolerance of the augmented Lagrangian formulation.
    pub al_incremental_slip_tolerance: Option<Real>,
    /// Frictional force tolerance of the augmented Lagrangian formulation.
    pub al_frictional_force_tolerance: Option<Real>,
    /// The normal smoothing method, if any.
    pub normal_smoothing_method: Option<NormalSmoothingMethod>,
    /// Width of the smoothing band along face edges, in reference units.
    pub normal_smoothing_distance: Option<Real>,
    /// Log every change of the set of nodes in contact.
    pub print_contact_nodes: bool,
}

impl Default for ContactConfig {
    fn default() -> Self {
        ContactConfig {
            model: ContactModel::Frictionless,
            formulation: ContactFormulation::Kinematic,
            penalty: 1.0e8,
            tangential_penalty: None,
            penalty_multiplier: 1.0,
            normalize_penalty: false,
            friction_coefficient: 0.0,
            tangential_tolerance: 0.0,
            capture_tolerance: 0.0,
            tension_release: 0.0,
            stick_lock_iterations: u32::MAX,
            stick_unlock_factor: 1.5,
            al_penetration_tolerance: None,
            al_incremental_slip_tolerance: None,
            al_frictional_force_tolerance: None,
            normal_smoothing_method: None,
            normal_smoothing_distance: None,
            print_contact_nodes: false,
        }
    }
}

impl ContactConfig {
    /// Checks the consistency of the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.formulation == ContactFormulation::TangentialPenalty && !self.model.is_coulomb() {
            return Err(ConfigError::TangentialPenaltyNeedsCoulomb);
        }

        if self.friction_coefficient < 0.0 {
            return Err(ConfigError::NegativeFrictionCoefficient);
        }

        if self.formulation == ContactFormulation::AugmentedLagrange {
            if self.model == ContactModel::Glued {
                return Err(ConfigError::AugmentedLagrangeGlued);
            }

            if self.al_penetration_tolerance.is_none() {
                return Err(ConfigError::MissingAugmentedLagrangeTolerance(
                    "al_penetration_tolerance",
                ));
            }

            if self.model != ContactModel::Frictionless {
                if self.al_incremental_slip_tolerance.is_none() {
                    return Err(ConfigError::MissingAugmentedLagrangeTolerance(
                        "al_incremental_slip_tolerance",
                    ));
                }
                if self.al_frictional_force_tolerance.is_none() {
                    return Err(ConfigError::MissingAugmentedLagrangeTolerance(
                        "al_frictional_force_tolerance",
                    ));
                }
            }
        }

        if self.normal_smoothing_method == Some(NormalSmoothingMethod::EdgeBased)
            && self.normal_smoothing_distance.is_none()
        {
            return Err(ConfigError::MissingSmoothingData(
                "edge_based",
                "normal_smoothing_distance",
            ));
        }

        Ok(())
    }

    /// The search-pass configuration implied by this contact configuration.
    pub fn locator_config(&self) -> LocatorConfig {
        LocatorConfig {
            projection: ProjectionOptions {
                tangential_tolerance: self.tangential_tolerance,
                ..ProjectionOptions::default()
            },
            update_location: self.model != ContactModel::Glued,
            normal_smoothing_method: self.normal_smoothing_method,
            normal_smoothing_distance: self.normal_smoothing_distance.unwrap_or(0.0),
            ..LocatorConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_named_options() {
        assert_eq!("coulomb".parse(), Ok(ContactModel::Coulomb));
        assert_eq!("Glued".parse(), Ok(ContactModel::Glued));
        assert_eq!("default".parse(), Ok(ContactFormulation::Kinematic));
        assert_eq!(
            "nodal_normal_based".parse(),
            Ok(NormalSmoothingMethod::NodalNormalBased)
        );
        assert_eq!(
            "sticky".parse::<ContactModel>(),
            Err(ConfigError::UnknownModel("sticky".to_string()))
        );
    }

    #[test]
    fn invalid_combinations_are_rejected() {
        let config = ContactConfig {
            formulation: ContactFormulation::TangentialPenalty,
            ..ContactConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::TangentialPenaltyNeedsCoulomb)
        );

        let config = ContactConfig {
            friction_coefficient: -0.1,
            ..ContactConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::NegativeFrictionCoefficient)
        );

        let config = ContactConfig {
            model: ContactModel::Coulomb,
            formulation: ContactFormulation::AugmentedLagrange,
            al_penetration_tolerance: Some(1.0e-6),
            ..ContactConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingAugmentedLagrangeTolerance(
                "al_incremental_slip_tolerance"
            ))
        );
    }

    #[test]
    fn glued_contact_freezes_locations() {
        let config = ContactConfig {
            model: ContactModel::Glued,
            ..ContactConfig::default()
        };
        assert!(config.validate().is_ok());
        assert!(!config.locator_config().update_location);
    }
}
