//! # License Gating
//!
//! A [`LicenseValidator`] maps each [`ProviderType`] to the minimum [`Tier`]
//! required to register it, and the registry consults one before accepting
//! a new provider config. Tiers are never baked into adapters or the
//! router — gating lives entirely behind this trait so license policy can
//! be swapped per build (see §4.8, §9 "License gating").
//!
//! The source this crate is modeled on carries two parallel tier
//! taxonomies: an older "OSS" label (Gemini gated to Professional) and a
//! newer "Community" label (Gemini included in Community). §9's Open
//! Questions calls this out explicitly rather than resolving it silently;
//! this crate implements the newer Community taxonomy (see `DESIGN.md`)
//! and keeps the `Tier::Community` name throughout.

use crate::error::LicenseError;
use crate::models::ProviderType;

/// A license level in a total order. `Ord`'s derived implementation ranks
/// variants by declaration order, which is exactly the rank this module
/// needs for `satisfies`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    Community,
    Professional,
    Enterprise,
    EnterprisePlus,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Tier::Community => "community",
            Tier::Professional => "professional",
            Tier::Enterprise => "enterprise",
            Tier::EnterprisePlus => "enterprise+",
        };
        write!(f, "{s}")
    }
}

/// Whether `current` satisfies `required`: the current tier must rank at
/// or above the required one.
pub fn satisfies(current: Tier, required: Tier) -> bool {
    current >= required
}

/// Policy object gating which provider types may be registered under a
/// given license tier.
pub trait LicenseValidator: Send + Sync {
    /// The tier the caller is currently licensed at.
    fn current_tier(&self) -> Tier;

    /// Minimum tier required to register `provider_type`. Unknown types
    /// default to `Professional` (denied at Community), per §4.8.
    fn required_tier(&self, provider_type: &ProviderType) -> Tier;

    /// Checks `provider_type` against [`Self::current_tier`], returning
    /// the structured [`LicenseError`] on denial.
    fn check(&self, provider_type: &ProviderType) -> Result<(), LicenseError> {
        let required = self.required_tier(provider_type);
        let current = self.current_tier();
        if satisfies(current, required) {
            Ok(())
        } else {
            Err(LicenseError {
                provider_type: provider_type.clone(),
                current,
                required,
            })
        }
    }
}

/// The default validator: advertises `Community`, gating
/// {OpenAI, Anthropic, Gemini, Ollama} to Community and
/// {Bedrock, Custom, AzureOpenAI} to Professional.
pub struct DefaultLicenseValidator {
    tier: Tier,
}

impl DefaultLicenseValidator {
    pub fn new(tier: Tier) -> Self {
        Self { tier }
    }
}

impl Default for DefaultLicenseValidator {
    fn default() -> Self {
        Self::new(Tier::Community)
    }
}

impl LicenseValidator for DefaultLicenseValidator {
    fn current_tier(&self) -> Tier {
        self.tier
    }

    fn required_tier(&self, provider_type: &ProviderType) -> Tier {
        match provider_type {
            ProviderType::Ollama
            | ProviderType::OpenAI
            | ProviderType::Anthropic
            | ProviderType::Gemini => Tier::Community,
            ProviderType::Bedrock | ProviderType::Custom(_) | ProviderType::AzureOpenAI => {
                Tier::Professional
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn community_validator_accepts_community_types() {
        let validator = DefaultLicenseValidator::default();
        assert!(validator.check(&ProviderType::OpenAI).is_ok());
        assert!(validator.check(&ProviderType::Anthropic).is_ok());
        assert!(validator.check(&ProviderType::Gemini).is_ok());
        assert!(validator.check(&ProviderType::Ollama).is_ok());
    }

    #[test]
    fn community_validator_rejects_professional_types() {
        let validator = DefaultLicenseValidator::default();
        let err = validator.check(&ProviderType::Bedrock).unwrap_err();
        assert_eq!(err.current, Tier::Community);
        assert_eq!(err.required, Tier::Professional);
    }

    #[test]
    fn professional_validator_accepts_bedrock() {
        let validator = DefaultLicenseValidator::new(Tier::Professional);
        assert!(validator.check(&ProviderType::Bedrock).is_ok());
        assert!(validator.check(&ProviderType::Custom("vllm".to_string())).is_ok());
    }

    #[test]
    fn tier_ordering_is_linear() {
        assert!(satisfies(Tier::Enterprise, Tier::Professional));
        assert!(!satisfies(Tier::Community, Tier::Enterprise));
        assert!(satisfies(Tier::EnterprisePlus, Tier::EnterprisePlus));
    }
}
