//! Upgrade notifier: a one-time notice on first run and after upgrades.

use jimple_config::{StateError, StateStore};
use jimple_types::UpgradeNotice;

pub const REPOSITORY_URL: &str = "https://github.com/swissiety/JimpleLSP";
pub const ISSUES_URL: &str = "https://github.com/swissiety/JimpleLSP/issues";

/// Actions offered alongside an upgrade notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeAction {
    Settings,
    StarOnGithub,
    ReportBug,
}

impl NoticeAction {
    pub const ALL: [Self; 3] = [Self::Settings, Self::StarOnGithub, Self::ReportBug];

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Settings => "Settings",
            Self::StarOnGithub => "Star on Github",
            Self::ReportBug => "Report Bug",
        }
    }

    /// Page opened by the action; `None` for `Settings`.
    #[must_use]
    pub fn url(self) -> Option<&'static str> {
        match self {
            Self::Settings => None,
            Self::StarOnGithub => Some(REPOSITORY_URL),
            Self::ReportBug => Some(ISSUES_URL),
        }
    }
}

/// Decide whether to show a notice for `current`, recording it when one is due.
///
/// Nothing is written when no notice is produced, so a downgrade keeps the
/// newer recorded version.
pub fn check_version(
    store: &StateStore,
    current: &str,
) -> Result<Option<UpgradeNotice>, StateError> {
    let previous = store.last_version()?;
    let Some(notice) = UpgradeNotice::evaluate(previous.as_deref(), current) else {
        tracing::debug!(current, previous = ?previous, "No upgrade notice");
        return Ok(None);
    };
    store.record_version(current)?;
    Ok(Some(notice))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> StateStore {
        StateStore::new(dir.path().join("state.toml"))
    }

    #[test]
    fn first_run_records_the_version() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let notice = check_version(&store, "0.4.0").unwrap();
        assert_eq!(notice, Some(UpgradeNotice::FirstRun));
        assert_eq!(store.last_version().unwrap().as_deref(), Some("0.4.0"));

        assert_eq!(check_version(&store, "0.4.0").unwrap(), None);
    }

    #[test]
    fn upgrade_shows_the_new_version() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.record_version("0.3.2").unwrap();

        let notice = check_version(&store, "0.4.0").unwrap().unwrap();
        assert_eq!(notice.message(), "JimpleLSP Plugin updated to 0.4.0.");
        assert_eq!(store.last_version().unwrap().as_deref(), Some("0.4.0"));
    }

    #[test]
    fn downgrade_leaves_state_untouched() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.record_version("0.5.0").unwrap();
        let before = fs::read_to_string(store.path()).unwrap();

        assert_eq!(check_version(&store, "0.4.0").unwrap(), None);
        assert_eq!(fs::read_to_string(store.path()).unwrap(), before);
    }

    #[test]
    fn actions_link_to_the_project() {
        let labels: Vec<_> = NoticeAction::ALL.iter().map(|a| a.label()).collect();
        assert_eq!(labels, ["Settings", "Star on Github", "Report Bug"]);
        assert_eq!(NoticeAction::StarOnGithub.url(), Some(REPOSITORY_URL));
        assert_eq!(NoticeAction::ReportBug.url(), Some(ISSUES_URL));
        assert_eq!(NoticeAction::Settings.url(), None);
    }
}
