//! Hub profile resolution: `--profile` CLI flag -> `KOJI_SYNC_PROFILE` env
//! var -> default `"koji"`. No on-disk config file format is mandated.

use crate::types::ProfileName;

pub fn resolve_profile(cli_flag: Option<&str>) -> ProfileName {
    if let Some(flag) = cli_flag {
        return ProfileName::new(flag).unwrap_or_default();
    }
    if let Ok(env) = std::env::var("KOJI_SYNC_PROFILE") {
        if let Ok(profile) = ProfileName::new(env) {
            return profile;
        }
    }
    ProfileName::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flag_wins_over_env() {
        std::env::set_var("KOJI_SYNC_PROFILE", "staging");
        let profile = resolve_profile(Some("production"));
        assert_eq!(profile.as_str(), "production");
        std::env::remove_var("KOJI_SYNC_PROFILE");
    }

    #[test]
    fn test_default_is_koji() {
        std::env::remove_var("KOJI_SYNC_PROFILE");
        let profile = resolve_profile(None);
        assert_eq!(profile.as_str(), "koji");
    }
}
