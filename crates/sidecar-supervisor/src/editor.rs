use std::path::Path;

/// Canonical editor families. Aliases and path basenames collapse onto these.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EditorKind {
    Vim,
    Helix,
    Emacs,
    Nano,
    Kakoune,
    Micro,
    Unknown(String),
}

impl EditorKind {
    pub fn id(&self) -> &str {
        match self {
            EditorKind::Vim => "vim",
            EditorKind::Helix => "helix",
            EditorKind::Emacs => "emacs",
            EditorKind::Nano => "nano",
            EditorKind::Kakoune => "kakoune",
            EditorKind::Micro => "micro",
            EditorKind::Unknown(name) => name,
        }
    }

    pub fn is_vi_family(&self) -> bool {
        matches!(self, EditorKind::Vim)
    }
}

/// Normalizes an editor command line such as `/usr/local/bin/nvim -u NONE`.
pub fn normalize_editor(command: &str) -> EditorKind {
    let program = command.split_whitespace().next().unwrap_or_default();
    let base = Path::new(program)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(program)
        .to_ascii_lowercase();
    let base = base.strip_suffix(".exe").unwrap_or(&base);
    match base {
        "vi" | "vim" | "nvim" | "gvim" | "mvim" | "view" => EditorKind::Vim,
        "hx" | "helix" => EditorKind::Helix,
        "emacs" | "emacsclient" => EditorKind::Emacs,
        "nano" | "pico" => EditorKind::Nano,
        "kak" | "kakoune" => EditorKind::Kakoune,
        "micro" => EditorKind::Micro,
        other => EditorKind::Unknown(other.to_string()),
    }
}

/// One `send-keys` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStep {
    pub keys: Vec<String>,
    pub literal: bool,
}

impl KeyStep {
    fn named(keys: &[&str]) -> Self {
        Self {
            keys: keys.iter().map(|key| key.to_string()).collect(),
            literal: false,
        }
    }

    fn literal(text: &str) -> Self {
        Self {
            keys: vec![text.to_string()],
            literal: true,
        }
    }
}

/// Keystrokes that write the buffer and exit. `None` for editors we do not
/// know how to drive; the caller prompts instead.
pub fn save_quit_recipe(kind: &EditorKind) -> Option<Vec<KeyStep>> {
    let steps = match kind {
        EditorKind::Vim | EditorKind::Helix => vec![
            KeyStep::named(&["Escape"]),
            KeyStep::literal(":wq"),
            KeyStep::named(&["Enter"]),
        ],
        EditorKind::Emacs => vec![KeyStep::named(&["C-x", "C-s", "C-x", "C-c"])],
        EditorKind::Nano => vec![
            KeyStep::named(&["C-o"]),
            KeyStep::named(&["Enter"]),
            KeyStep::named(&["C-x"]),
        ],
        EditorKind::Kakoune => vec![
            KeyStep::named(&["Escape"]),
            KeyStep::literal(":write-quit"),
            KeyStep::named(&["Enter"]),
        ],
        EditorKind::Micro => vec![KeyStep::named(&["C-s", "C-q"])],
        EditorKind::Unknown(_) => return None,
    };
    Some(steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_and_paths_collapse_to_canonical_ids() {
        assert_eq!(normalize_editor("nvim"), EditorKind::Vim);
        assert_eq!(normalize_editor("/usr/bin/vi"), EditorKind::Vim);
        assert_eq!(normalize_editor("hx"), EditorKind::Helix);
        assert_eq!(normalize_editor("emacsclient -t"), EditorKind::Emacs);
        assert_eq!(normalize_editor("pico"), EditorKind::Nano);
        assert_eq!(normalize_editor("kak"), EditorKind::Kakoune);
        assert_eq!(
            normalize_editor("/opt/bin/Sublime"),
            EditorKind::Unknown("sublime".to_string())
        );
    }

    #[test]
    fn vi_family_writes_with_escape_prefix() {
        let steps = save_quit_recipe(&EditorKind::Vim).expect("vim recipe");
        assert_eq!(steps[0].keys, vec!["Escape".to_string()]);
        assert_eq!(steps[1], KeyStep::literal(":wq"));
    }

    #[test]
    fn pico_style_uses_control_o_then_control_x() {
        let steps = save_quit_recipe(&EditorKind::Nano).expect("nano recipe");
        let flat: Vec<&str> = steps
            .iter()
            .flat_map(|step| step.keys.iter().map(String::as_str))
            .collect();
        assert_eq!(flat, vec!["C-o", "Enter", "C-x"]);
    }

    #[test]
    fn unknown_editor_has_no_recipe() {
        assert!(save_quit_recipe(&normalize_editor("ed")).is_none());
    }
}
