//! Desktop entry (`.desktop`) parsing
//!
//! Only the keys the index needs are read; localized variants are ignored.

use std::path::Path;

use beacon_core::CandidateKind;
use chrono::{DateTime, Utc};
use serde_json::json;

use super::{AdaptError, Candidate, EntityRef};

const MAIN_GROUP: &str = "[Desktop Entry]";

/// Field codes that expand to arguments at launch time
const FIELD_CODES: &[&str] = &[
    "%f", "%F", "%u", "%U", "%d", "%D", "%n", "%N", "%i", "%c", "%k", "%v", "%m",
];

/// The subset of a desktop entry the launcher cares about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesktopEntry {
    pub entry_type: Option<String>,
    pub name: Option<String>,
    pub generic_name: Option<String>,
    pub comment: Option<String>,
    pub keywords: Vec<String>,
    pub exec: Option<String>,
    pub no_display: bool,
    pub hidden: bool,
    pub terminal: bool,
}

impl DesktopEntry {
    pub fn parse(contents: &str) -> Self {
        let mut entry = DesktopEntry::default();
        let mut in_main_group = false;

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('[') {
                in_main_group = line == MAIN_GROUP;
                continue;
            }
            if !in_main_group {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();

            match key.trim() {
                "Type" => entry.entry_type = Some(value.to_string()),
                "Name" => entry.name = non_empty(value),
                "GenericName" => entry.generic_name = non_empty(value),
                "Comment" => entry.comment = non_empty(value),
                "Keywords" => {
                    entry.keywords = value
                        .split(';')
                        .map(str::trim)
                        .filter(|k| !k.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                "Exec" => entry.exec = non_empty(value),
                "NoDisplay" => entry.no_display = value == "true",
                "Hidden" => entry.hidden = value == "true",
                "Terminal" => entry.terminal = value == "true",
                _ => {}
            }
        }

        entry
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

pub(super) fn adapt(
    entity: &EntityRef,
    path: &Path,
    contents: &str,
    observed_at: DateTime<Utc>,
) -> Result<Candidate, AdaptError> {
    let entry = DesktopEntry::parse(contents);

    if entry.hidden || entry.no_display {
        return Err(AdaptError::Hidden(entity.to_string()));
    }
    if let Some(entry_type) = &entry.entry_type {
        if entry_type != "Application" {
            return Err(AdaptError::Hidden(entity.to_string()));
        }
    }

    let name = entry
        .name
        .clone()
        .ok_or_else(|| AdaptError::malformed(entity, "missing Name"))?;
    let exec = entry
        .exec
        .as_deref()
        .map(strip_field_codes)
        .filter(|exec| !exec.is_empty())
        .ok_or_else(|| AdaptError::malformed(entity, "missing Exec"))?;

    let mut aliases = vec![name.clone()];
    aliases.extend(entry.generic_name.clone());
    aliases.extend(entry.comment.clone());
    aliases.extend(entry.keywords.iter().cloned());
    aliases.extend(executable_name(&exec));
    if let Some(stem) = path.file_stem() {
        aliases.push(stem.to_string_lossy().to_string());
    }

    Ok(Candidate {
        id: entity.candidate_id(),
        display_name: name,
        aliases,
        kind: CandidateKind::Application,
        launch: json!({
            "type": "application",
            "exec": exec,
            "desktop_file": path.to_string_lossy(),
            "terminal": entry.terminal,
        }),
        last_valid: observed_at,
    })
}

/// Remove `%f`-style field codes and unescape `%%`
fn strip_field_codes(exec: &str) -> String {
    exec.split_whitespace()
        .filter(|part| !FIELD_CODES.contains(part))
        .map(|part| part.replace("%%", "%"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Basename of the program an Exec line runs, skipping an `env` prefix
fn executable_name(exec: &str) -> Option<String> {
    let mut parts = exec.split_whitespace().map(|part| part.trim_matches('"'));
    let mut program = parts.next()?;
    if program == "env" || program.ends_with("/env") {
        program = parts.find(|part| !part.contains('=') && !part.starts_with('-'))?;
    }
    Path::new(program)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const FIREFOX: &str = "\
[Desktop Entry]
Version=1.0
Name=Firefox
Name[de]=Firefox Webbrowser
GenericName=Web Browser
Comment=Browse the World Wide Web
Keywords=Internet;WWW;Browser;
Exec=/usr/lib/firefox/firefox %u
Terminal=false
Type=Application

[Desktop Action new-window]
Name=New Window
Exec=/usr/lib/firefox/firefox --new-window %u
";

    fn entity(name: &str) -> (EntityRef, PathBuf) {
        let path = PathBuf::from(format!("/usr/share/applications/{name}"));
        (EntityRef::DesktopEntry(path.clone()), path)
    }

    #[test]
    fn parse_reads_main_group_only() {
        let entry = DesktopEntry::parse(FIREFOX);

        assert_eq!(entry.name.as_deref(), Some("Firefox"));
        assert_eq!(entry.exec.as_deref(), Some("/usr/lib/firefox/firefox %u"));
        assert_eq!(entry.comment.as_deref(), Some("Browse the World Wide Web"));
        assert_eq!(entry.keywords, vec!["Internet", "WWW", "Browser"]);
        assert!(!entry.terminal);
    }

    #[test]
    fn adapt_builds_application_candidate() {
        let (entity, path) = entity("firefox.desktop");
        let candidate = adapt(&entity, &path, FIREFOX, Utc::now()).unwrap();

        assert_eq!(candidate.id, "app:firefox.desktop");
        assert_eq!(candidate.display_name, "Firefox");
        assert_eq!(candidate.kind, CandidateKind::Application);
        assert!(candidate.aliases.contains(&"Web Browser".to_string()));
        assert!(candidate.aliases.contains(&"firefox".to_string()));
        assert_eq!(candidate.launch["exec"], "/usr/lib/firefox/firefox");
    }

    #[test]
    fn comment_makes_the_description_searchable() {
        let (entity, path) = entity("thunderbird.desktop");
        let contents = "[Desktop Entry]\nType=Application\nName=Thunderbird\n\
                        Comment=Send and receive mail\nExec=thunderbird %u\n";
        let candidate = adapt(&entity, &path, contents, Utc::now()).unwrap();

        let mut store = crate::index::IndexStore::default();
        store.insert_or_update(candidate);
        let lookup = store.lookup(&crate::index::query_tokens("mail"), None);
        assert_eq!(lookup.hits.len(), 1);
        assert_eq!(lookup.hits[0].id, "app:thunderbird.desktop");
    }

    #[test]
    fn no_display_entries_are_hidden() {
        let (entity, path) = entity("helper.desktop");
        let contents = "[Desktop Entry]\nName=Helper\nExec=helper\nNoDisplay=true\n";
        let err = adapt(&entity, &path, contents, Utc::now()).unwrap_err();
        assert!(err.is_absent());
    }

    #[test]
    fn missing_exec_is_malformed() {
        let (entity, path) = entity("broken.desktop");
        let contents = "[Desktop Entry]\nType=Application\nName=Broken\n";
        let err = adapt(&entity, &path, contents, Utc::now()).unwrap_err();
        assert!(matches!(err, AdaptError::Malformed { .. }));
    }

    #[test]
    fn executable_name_skips_env_assignments() {
        assert_eq!(
            executable_name("env GDK_BACKEND=x11 /opt/app/bin/slack --silent").as_deref(),
            Some("slack")
        );
        assert_eq!(executable_name("\"/usr/bin/code\"").as_deref(), Some("code"));
    }
}
