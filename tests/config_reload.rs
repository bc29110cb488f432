use anyhow::Result;
use site_scraper::config::AppConfig;
use site_scraper::error::ConfigError;
use site_scraper::registry::RegistryHandle;
use std::fs;
use tempfile::tempdir;

fn profile(name: &str, record: &str) -> String {
    format!(
        r#"
[[profiles]]
name = "{name}"
record = "{record}"

[[profiles.fields]]
name = "title"
selector = "h2"

[[profiles.schema]]
name = "title"
required = true
"#
    )
}

#[test]
fn test_reload_picks_up_new_profiles() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("config.toml");
    fs::write(&path, profile("news", "article"))?;

    let handle = RegistryHandle::load(&path)?;
    let before = handle.snapshot();
    assert_eq!(before.len(), 1);

    fs::write(
        &path,
        format!("{}{}", profile("news", "article"), profile("events", "li.event")),
    )?;
    let after = handle.reload()?;

    assert_eq!(after.len(), 2);
    assert!(handle.snapshot().get("events").is_some());
    // a snapshot taken earlier is untouched
    assert_eq!(before.len(), 1);
    assert!(before.get("events").is_none());
    Ok(())
}

#[test]
fn test_failed_reload_keeps_current_registry() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("config.toml");
    fs::write(&path, profile("news", "article"))?;
    let handle = RegistryHandle::load(&path)?;

    fs::write(&path, profile("news", "article["))?;
    assert!(matches!(handle.reload(), Err(ConfigError::Selector { .. })));

    fs::write(&path, "profiles = 3")?;
    assert!(matches!(handle.reload(), Err(ConfigError::Toml(_))));

    fs::remove_file(&path)?;
    assert!(matches!(handle.reload(), Err(ConfigError::Read { .. })));

    let current = handle.snapshot();
    assert_eq!(current.len(), 1);
    assert!(current.get("news").is_some());
    Ok(())
}

#[test]
fn test_fetch_settings_are_validated() -> Result<()> {
    assert!(matches!(
        AppConfig::from_toml_str("[fetch]\ntimeout_secs = 0\n"),
        Err(ConfigError::Setting(_))
    ));

    let config = AppConfig::from_toml_str("[fetch]\ntimeout_secs = 3\n")?;
    assert_eq!(config.fetch.timeout_secs, 3);
    assert!(config.profiles.is_empty());
    Ok(())
}

#[test]
fn test_duplicate_profile_names_fail_to_load() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        format!("{}{}", profile("news", "article"), profile("news", "div")),
    )?;
    assert!(matches!(
        RegistryHandle::load(&path),
        Err(ConfigError::DuplicateProfile(name)) if name == "news"
    ));
    Ok(())
}
