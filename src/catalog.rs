use serde::Serialize;
use std::collections::HashMap;

/// Everything the sandbox needs to know about one language.
///
/// Compiled languages rely on an entrypoint baked into their image that
/// compiles in place and exits non-zero on compile failure; the catalog only
/// carries the command that invokes it.
#[derive(Debug, Clone, Serialize)]
pub struct LanguageSpec {
    #[serde(rename = "language")]
    pub tag: &'static str,
    pub image: &'static str,
    pub source_filename: &'static str,
    pub compiled: bool,
    #[serde(skip)]
    cmd: &'static [&'static str],
    #[serde(skip)]
    cmd_stdin: &'static str,
}

impl LanguageSpec {
    /// Image name with the configured prefix applied.
    pub fn image_name(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.image)
    }

    /// The argv the container runs.
    ///
    /// With stdin present the command is wrapped in a shell so the workload
    /// reads from `input.txt` via redirection; stdin is never delivered over
    /// the container's attach stream.
    pub fn command(&self, with_stdin: bool) -> Vec<String> {
        if with_stdin {
            vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                self.cmd_stdin.to_string(),
            ]
        } else {
            self.cmd.iter().map(|s| s.to_string()).collect()
        }
    }
}

/// Static mapping from language tag to sandbox image and command.
pub struct Catalog {
    languages: HashMap<&'static str, LanguageSpec>,
}

impl Catalog {
    pub fn new() -> Self {
        let specs = [
            LanguageSpec {
                tag: "python",
                image: "python-executor",
                source_filename: "main.py",
                compiled: false,
                cmd: &["python3", "main.py"],
                cmd_stdin: "python3 main.py < input.txt",
            },
            LanguageSpec {
                tag: "javascript",
                image: "javascript-executor",
                source_filename: "main.js",
                compiled: false,
                cmd: &["node", "main.js"],
                cmd_stdin: "node main.js < input.txt",
            },
            LanguageSpec {
                tag: "cpp",
                image: "cpp-executor",
                source_filename: "main.cpp",
                compiled: true,
                cmd: &["/entrypoint.sh"],
                cmd_stdin: "/entrypoint.sh < input.txt",
            },
            LanguageSpec {
                tag: "java",
                image: "java-executor",
                source_filename: "Main.java",
                compiled: true,
                cmd: &["/entrypoint.sh"],
                cmd_stdin: "/entrypoint.sh < input.txt",
            },
            LanguageSpec {
                tag: "go",
                image: "go-executor",
                source_filename: "main.go",
                compiled: false,
                cmd: &["go", "run", "main.go"],
                cmd_stdin: "go run main.go < input.txt",
            },
        ];

        let mut languages = HashMap::new();
        for spec in specs {
            languages.insert(spec.tag, spec);
        }
        Self { languages }
    }

    pub fn lookup(&self, tag: &str) -> Option<&LanguageSpec> {
        self.languages.get(tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LanguageSpec> {
        self.languages.values()
    }

    pub fn len(&self) -> usize {
        self.languages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_supported_tag_is_fully_defined() {
        let catalog = Catalog::new();
        for tag in ["python", "javascript", "cpp", "java", "go"] {
            let spec = catalog.lookup(tag).unwrap_or_else(|| panic!("missing {}", tag));
            assert!(!spec.image.is_empty());
            assert!(!spec.source_filename.is_empty());
            assert!(!spec.command(false).is_empty());
            assert!(!spec.command(true).is_empty());
        }
        assert_eq!(catalog.len(), 5);
    }

    #[test]
    fn test_unknown_tags_miss() {
        let catalog = Catalog::new();
        assert!(catalog.lookup("rust").is_none());
        assert!(catalog.lookup("Python").is_none());
        assert!(catalog.lookup("").is_none());
    }

    #[test]
    fn test_source_filenames() {
        let catalog = Catalog::new();
        assert_eq!(catalog.lookup("python").unwrap().source_filename, "main.py");
        assert_eq!(
            catalog.lookup("javascript").unwrap().source_filename,
            "main.js"
        );
        assert_eq!(catalog.lookup("cpp").unwrap().source_filename, "main.cpp");
        assert_eq!(catalog.lookup("java").unwrap().source_filename, "Main.java");
        assert_eq!(catalog.lookup("go").unwrap().source_filename, "main.go");
    }

    #[test]
    fn test_compiled_flags() {
        let catalog = Catalog::new();
        assert!(catalog.lookup("cpp").unwrap().compiled);
        assert!(catalog.lookup("java").unwrap().compiled);
        assert!(!catalog.lookup("python").unwrap().compiled);
        assert!(!catalog.lookup("javascript").unwrap().compiled);
        // Go compiles and runs in one step inside the sandbox.
        assert!(!catalog.lookup("go").unwrap().compiled);
    }

    #[test]
    fn test_stdin_command_uses_shell_redirection() {
        let catalog = Catalog::new();
        let cmd = catalog.lookup("python").unwrap().command(true);
        assert_eq!(cmd[0], "/bin/sh");
        assert_eq!(cmd[1], "-c");
        assert!(cmd[2].ends_with("< input.txt"));

        let go_cmd = catalog.lookup("go").unwrap().command(true);
        assert_eq!(go_cmd[2], "go run main.go < input.txt");
    }

    #[test]
    fn test_image_prefix_applied() {
        let catalog = Catalog::new();
        let spec = catalog.lookup("python").unwrap();
        assert_eq!(spec.image_name(""), "python-executor");
        assert_eq!(
            spec.image_name("registry.local/classroom-"),
            "registry.local/classroom-python-executor"
        );
    }
}
