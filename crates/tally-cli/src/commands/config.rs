use tally_core::util::normalize_text_option;

use crate::cli::ConfigCommands;
use crate::config_profiles::{default_config_path, CliProfile, CliProfilesConfig};
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            api_base_url,
            token,
            no_activate,
        } => run_config_init(global_profile, api_base_url, token, no_activate),
        ConfigCommands::Show => run_config_show(global_profile),
    }
}

pub fn run_config_init(
    profile_name: Option<&str>,
    api_base_url: Option<String>,
    token: Option<String>,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load()?;
    let profile_name = config.resolve_profile_name(profile_name);
    let profile = apply_profile_init(&mut config, &profile_name, api_base_url, token, no_activate)?;

    let path = config.save()?;
    println!("Saved profile '{profile_name}' to {}", path.display());
    if let Some(url) = profile.api_base_url.as_deref() {
        println!("API base URL: {url}");
    }
    if profile.access_token.is_none() {
        println!("No access token set; `tally sync` needs one.");
    }
    Ok(())
}

/// Merge explicit options into the named profile, keeping unset fields.
pub fn apply_profile_init(
    config: &mut CliProfilesConfig,
    profile_name: &str,
    api_base_url: Option<String>,
    token: Option<String>,
    no_activate: bool,
) -> Result<CliProfile, CliError> {
    let existing = config.profile(profile_name).cloned().unwrap_or_default();
    let profile = CliProfile {
        api_base_url: normalize_text_option(api_base_url).or(existing.api_base_url),
        access_token: normalize_text_option(token).or(existing.access_token),
        settings: existing.settings,
    };
    profile.validate()?;
    profile.sync_settings()?;

    *config.profile_mut_or_default(profile_name) = profile.clone();
    if !no_activate || config.active_profile.is_none() {
        config.active_profile = Some(profile_name.to_string());
    }
    Ok(profile)
}

pub fn run_config_show(global_profile: Option<&str>) -> Result<(), CliError> {
    let config = CliProfilesConfig::load()?;
    let profile_name = config.resolve_profile_name(global_profile);
    println!("Config file: {}", default_config_path()?.display());
    println!("Profile:     {profile_name}");

    let Some(profile) = config.profile(&profile_name) else {
        println!("(not configured)");
        return Ok(());
    };
    let settings = profile.sync_settings()?;
    println!(
        "Endpoint:    {}",
        settings.sync_endpoint().as_deref().unwrap_or("(none)")
    );
    println!(
        "Token:       {}",
        if profile.access_token().is_some() {
            "set"
        } else {
            "missing"
        }
    );
    println!("Settings:");
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}
