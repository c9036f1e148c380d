use async_trait::async_trait;
use regex::Regex;
use std::time::Instant;
use tokio::sync::OwnedSemaphorePermit;

use crate::catalog::LanguageSpec;
use crate::error::ExecError;
use crate::executor::{ExecutionBackend, ExecutionRequest, ExecutionResult};

/// Degraded-mode backend for developing the surrounding stack without a
/// container engine. Output is synthesized from the submission itself:
/// string literals in the language's print forms are echoed, and a print of
/// the stdin-reading idiom echoes the next stdin line. Deterministic in the
/// input by construction.
///
/// Responses produced through this backend are marked `"fallback": true` by
/// the front controller; production deployments never construct it.
pub struct FallbackExecutor {
    print_literal: Vec<(&'static str, Regex)>,
    python_echo: Regex,
}

impl FallbackExecutor {
    pub fn new() -> Self {
        let print_literal = vec![
            (
                "python",
                Regex::new(r#"print\(\s*(?:'([^']*)'|"([^"]*)")\s*\)"#).expect("fallback pattern"),
            ),
            (
                "javascript",
                Regex::new(r#"console\.log\(\s*(?:'([^']*)'|"([^"]*)")\s*\)"#)
                    .expect("fallback pattern"),
            ),
            (
                "go",
                Regex::new(r#"fmt\.Print(?:ln)?\(\s*"([^"]*)"\s*\)"#).expect("fallback pattern"),
            ),
            (
                "cpp",
                Regex::new(r#"std::cout\s*<<\s*"([^"]*)""#).expect("fallback pattern"),
            ),
            (
                "java",
                Regex::new(r#"System\.out\.println\(\s*"([^"]*)"\s*\)"#)
                    .expect("fallback pattern"),
            ),
        ];
        Self {
            print_literal,
            python_echo: Regex::new(r"print\(\s*input\(\s*\)\s*\)").expect("fallback pattern"),
        }
    }

    fn synthesize(&self, request: &ExecutionRequest) -> String {
        let mut stdout = String::new();
        let mut stdin_lines = request
            .stdin
            .as_deref()
            .unwrap_or_default()
            .lines()
            .map(str::to_string);

        let literal = self
            .print_literal
            .iter()
            .find(|(tag, _)| *tag == request.language)
            .map(|(_, re)| re);

        for line in request.code.lines() {
            if request.language == "python" && self.python_echo.is_match(line) {
                if let Some(input) = stdin_lines.next() {
                    stdout.push_str(&input);
                    stdout.push('\n');
                }
                continue;
            }
            if let Some(re) = literal {
                for cap in re.captures_iter(line) {
                    let text = cap
                        .get(1)
                        .or_else(|| cap.get(2))
                        .map(|m| m.as_str())
                        .unwrap_or("");
                    stdout.push_str(text);
                    stdout.push('\n');
                }
            }
        }
        stdout
    }
}

impl Default for FallbackExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionBackend for FallbackExecutor {
    async fn execute(
        &self,
        request: &ExecutionRequest,
        _spec: &LanguageSpec,
        permit: OwnedSemaphorePermit,
    ) -> Result<ExecutionResult, ExecError> {
        let start = Instant::now();
        let stdout = self.synthesize(request);
        let result = ExecutionResult {
            stdout,
            stderr: String::new(),
            exit_code: 0,
            oom_killed: false,
            timed_out: false,
            elapsed_ms: start.elapsed().as_millis().max(1) as u64,
        };
        drop(permit);
        Ok(result)
    }

    fn degraded(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(language: &str, code: &str, stdin: Option<&str>) -> ExecutionRequest {
        ExecutionRequest {
            language: language.to_string(),
            code: code.to_string(),
            stdin: stdin.map(str::to_string),
            timeout: None,
        }
    }

    #[test]
    fn test_python_literal_extraction() {
        let f = FallbackExecutor::new();
        assert_eq!(
            f.synthesize(&request("python", "print('hello')", None)),
            "hello\n"
        );
        assert_eq!(
            f.synthesize(&request("python", "print(\"a\")\nprint('b')", None)),
            "a\nb\n"
        );
    }

    #[test]
    fn test_python_stdin_echo() {
        let f = FallbackExecutor::new();
        assert_eq!(
            f.synthesize(&request("python", "print(input())", Some("abc"))),
            "abc\n"
        );
    }

    #[test]
    fn test_other_languages() {
        let f = FallbackExecutor::new();
        assert_eq!(
            f.synthesize(&request("javascript", "console.log('hi')", None)),
            "hi\n"
        );
        assert_eq!(
            f.synthesize(&request(
                "go",
                "package main\nfunc main() { fmt.Println(\"go\") }",
                None
            )),
            "go\n"
        );
        assert_eq!(
            f.synthesize(&request("cpp", "std::cout << \"cpp\";", None)),
            "cpp\n"
        );
        assert_eq!(
            f.synthesize(&request(
                "java",
                "System.out.println(\"java\");",
                None
            )),
            "java\n"
        );
    }

    #[test]
    fn test_deterministic_in_the_input() {
        let f = FallbackExecutor::new();
        let req = request("python", "print('x')\nprint(input())", Some("y"));
        assert_eq!(f.synthesize(&req), f.synthesize(&req));
        assert_eq!(f.synthesize(&req), "x\ny\n");
    }

    #[test]
    fn test_no_recognized_pattern_yields_empty_output() {
        let f = FallbackExecutor::new();
        assert_eq!(f.synthesize(&request("python", "x = 1 + 1", None)), "");
    }
}
