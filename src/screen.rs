use regex::Regex;
use std::collections::HashSet;

/// Static code screening ahead of any sandbox work.
///
/// This is defence in depth, not the isolation boundary: the patterns catch
/// accidental and low-effort misuse cheaply, before a container is paid for.
/// The sandbox itself (read-only root, no network, capped memory/cpu/pids)
/// is the real boundary and is never weakened on the screener's account.
pub struct Screener {
    max_code_len: usize,
    universal: Vec<Rule>,
    python_deny: Vec<Rule>,
    go_deny: Vec<Rule>,
    javascript_deny: Vec<Rule>,
    python_imports: HashSet<&'static str>,
    go_imports: HashSet<&'static str>,
    python_import_line: Regex,
    go_import_single: Regex,
    go_import_block: Regex,
    go_import_path: Regex,
}

struct Rule {
    pattern: Regex,
    reason: &'static str,
}

fn rule(pattern: &str, reason: &'static str) -> Rule {
    Rule {
        // Patterns are static literals; a failure to compile is a programming
        // error caught by the constructor test.
        pattern: Regex::new(pattern).expect("invalid screening pattern"),
        reason,
    }
}

const PYTHON_ALLOWED_IMPORTS: &[&str] = &[
    "math",
    "random",
    "datetime",
    "time",
    "json",
    "re",
    "string",
    "collections",
    "itertools",
    "functools",
    "typing",
];

const GO_ALLOWED_IMPORTS: &[&str] = &[
    "fmt",
    "strings",
    "strconv",
    "math",
    "time",
    "encoding/json",
    "errors",
    "sort",
    "regexp",
];

impl Screener {
    pub fn new(max_code_len: usize) -> Self {
        let universal = vec![
            rule(r"(?i)\bsystem\s*\(", "shell invocation"),
            rule(r"(?i)\bpopen\s*\(", "shell invocation"),
            rule(r"(?i)\bsubprocess\b", "process spawning"),
            rule(r"(?i)\bProcessBuilder\b", "process spawning"),
            rule(r"(?i)Runtime\s*\.\s*getRuntime", "process spawning"),
            rule(r"(?i)\bfork\s*\(", "process spawning"),
            rule(r"(?i)\bexecve?\s*\(", "process spawning"),
            rule(r"(?i)\bshutil\b", "filesystem mutation"),
            rule(r"(?i)\bunlink\s*\(", "filesystem mutation"),
            rule(r"(?i)\brmdir\s*\(", "filesystem mutation"),
            rule(r"(?i)\bos\.(remove|rename|chmod|chown|mkdir|makedirs)\b", "filesystem mutation"),
            rule(r"(?i)\bFileWriter\b", "filesystem mutation"),
            rule(r"(?i)\bFileOutputStream\b", "filesystem mutation"),
            rule(r"(?i)\bofstream\b", "filesystem mutation"),
            rule(r"(?i)\bfreopen\s*\(", "filesystem mutation"),
            rule(r"(?i)<filesystem>", "filesystem mutation"),
            rule(r"(?i)\bsocket\b", "network API"),
            rule(r"(?i)\burllib\b", "network API"),
            rule(r"(?i)\bhttp\.client\b", "network API"),
            rule(r#"(?i)\bnet/http\b"#, "network API"),
            rule(r"(?i)\bnet\.(Dial|Listen)\b", "network API"),
            rule(r"(?i)\bXMLHttpRequest\b", "network API"),
            rule(r"(?i)\bfetch\s*\(", "network API"),
            rule(r"(?i)\bjava\.net\b", "network API"),
        ];

        let python_deny = vec![
            rule(r"__import__", "dynamic import"),
            rule(r"\bgetattr\s*\(", "reflective attribute access"),
            rule(r"\bsetattr\s*\(", "reflective attribute access"),
            rule(r"\bdelattr\s*\(", "reflective attribute access"),
            rule(r"\bimportlib\b", "packaging module"),
            rule(r"\bpip\b", "packaging module"),
            rule(r"\bsetuptools\b", "packaging module"),
            rule(r"\bpkg_resources\b", "packaging module"),
        ];

        let go_deny = vec![
            rule(r"\bunsafe\b", "unsafe package"),
            rule(r"\breflect\b", "reflection"),
            rule(r"\bplugin\b", "plugin loading"),
            rule(r"\bsyscall\b", "raw syscalls"),
            rule(r#""runtime""#, "runtime package"),
            rule(r"\bos\.Exit\b", "process control"),
            rule(r"\bpanic\s*\(", "explicit panic"),
        ];

        let javascript_deny = vec![
            rule(r"\brequire\s*\(", "module loading"),
            rule(r"\bimport\s+.*\s+from\b", "module loading"),
            rule(r"\bprocess\b", "process object"),
            rule(r"\bglobal\b", "global object"),
            rule(r"\bBuffer\b", "raw buffers"),
            rule(r"__proto__", "prototype access"),
            rule(r"\bprototype\b", "prototype access"),
            rule(r"\bfs\b", "filesystem module"),
            rule(r"\bchild_process\b", "process spawning"),
            rule(r"\beval\s*\(", "dynamic evaluation"),
            rule(r"\bFunction\s*\(", "dynamic evaluation"),
        ];

        Self {
            max_code_len,
            universal,
            python_deny,
            go_deny,
            javascript_deny,
            python_imports: PYTHON_ALLOWED_IMPORTS.iter().copied().collect(),
            go_imports: GO_ALLOWED_IMPORTS.iter().copied().collect(),
            python_import_line: Regex::new(r"(?m)^\s*(?:import|from)\s+([^\n#]+)")
                .expect("invalid import pattern"),
            go_import_single: Regex::new(r#"(?m)^\s*import\s+(?:\w+\s+)?"([^"]+)""#)
                .expect("invalid import pattern"),
            go_import_block: Regex::new(r"(?s)import\s*\(([^)]*)\)")
                .expect("invalid import pattern"),
            go_import_path: Regex::new(r#""([^"]+)""#).expect("invalid import pattern"),
        }
    }

    /// Screen a submission. `Err` carries the rejection reason.
    pub fn screen(&self, language: &str, code: &str) -> Result<(), String> {
        if code.len() > self.max_code_len {
            return Err(format!(
                "code length exceeds the {} byte limit",
                self.max_code_len
            ));
        }

        for r in &self.universal {
            if r.pattern.is_match(code) {
                return Err(format!("code contains a forbidden pattern: {}", r.reason));
            }
        }

        match language {
            "python" => self.screen_python(code),
            "go" => self.screen_go(code),
            "javascript" => self.screen_rules(&self.javascript_deny, code),
            _ => Ok(()),
        }
    }

    fn screen_rules(&self, rules: &[Rule], code: &str) -> Result<(), String> {
        for r in rules {
            if r.pattern.is_match(code) {
                return Err(format!("code contains a forbidden pattern: {}", r.reason));
            }
        }
        Ok(())
    }

    fn screen_python(&self, code: &str) -> Result<(), String> {
        self.screen_rules(&self.python_deny, code)?;

        for cap in self.python_import_line.captures_iter(code) {
            let clause = cap[1].trim();
            let stmt = cap.get(0).map(|m| m.as_str().trim_start()).unwrap_or("");
            // `from x import y` names one module; `import a, b as c` may name
            // several. Either way only the top-level module matters.
            let modules: Vec<&str> = if stmt.starts_with("from") {
                vec![clause.split_whitespace().next().unwrap_or("")]
            } else {
                clause
                    .split(',')
                    .map(|m| m.trim().split_whitespace().next().unwrap_or(""))
                    .collect()
            };
            for module in modules {
                let top = module.split('.').next().unwrap_or("");
                if top.is_empty() {
                    continue;
                }
                if !self.python_imports.contains(top) {
                    return Err(format!("import of module '{}' is not allowed", top));
                }
            }
        }
        Ok(())
    }

    fn screen_go(&self, code: &str) -> Result<(), String> {
        self.screen_rules(&self.go_deny, code)?;

        for cap in self.go_import_single.captures_iter(code) {
            let path = &cap[1];
            if !self.go_imports.contains(path) {
                return Err(format!("import of package \"{}\" is not allowed", path));
            }
        }
        for block in self.go_import_block.captures_iter(code) {
            for path in self.go_import_path.captures_iter(&block[1]) {
                if !self.go_imports.contains(&path[1]) {
                    return Err(format!(
                        "import of package \"{}\" is not allowed",
                        &path[1]
                    ));
                }
            }
        }
        Ok(())
    }
}
