use super::MemberSettings;
use crate::ml::BaseModelKind;

pub(super) fn default_true() -> bool {
    true
}

pub(super) fn default_max_messages_per_account() -> usize {
    1000
}

pub(super) fn default_low_confidence_threshold() -> f32 {
    0.3
}

pub(super) fn default_uncertainty_margin() -> f32 {
    0.1
}

pub(super) fn default_members() -> Vec<MemberSettings> {
    vec![
        MemberSettings {
            kind: BaseModelKind::GbdtStump,
            weight: 0.5,
        },
        MemberSettings {
            kind: BaseModelKind::LogReg,
            weight: 0.3,
        },
        MemberSettings {
            kind: BaseModelKind::Mlp,
            weight: 0.2,
        },
    ]
}

pub(super) fn default_validation_fraction() -> f32 {
    0.2
}

pub(super) fn default_seed() -> u64 {
    42
}

pub(super) fn default_min_training_samples() -> usize {
    20
}

pub(super) fn default_retrain_threshold() -> usize {
    50
}

pub(super) fn default_bootstrap_min_confidence() -> f32 {
    0.6
}

pub(super) fn default_observed_capacity() -> usize {
    10_000
}

pub(super) fn default_log_level() -> String {
    "info".to_string()
}

pub(super) fn default_max_log_files() -> usize {
    10
}
