use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const FORBIDDEN_WORDS: [&str; 14] = [
    "FIXED",
    "CORRECTED",
    "FIX",
    "FIXES",
    "NEW",
    "CHANGED",
    "CHANGES",
    "CHANGE",
    "MODIFIED",
    "MODIFIES",
    "MODIFY",
    "UPDATED",
    "UPDATES",
    "UPDATE",
];

/// Which policy a collected line violated; selects the report wording.
#[derive(Clone, Copy)]
enum Policy {
    UnderscorePrefix,
    ForbiddenComment,
    UppercaseComment,
    AllowDeadCode,
}

impl Policy {
    fn headline(self) -> &'static str {
        match self {
            Policy::UnderscorePrefix => "underscore-prefixed identifiers",
            Policy::ForbiddenComment => "forbidden comment patterns",
            Policy::UppercaseComment => "comments with all uppercase alphabetic characters",
            Policy::AllowDeadCode => "#[allow(dead_code)] attributes",
        }
    }

    fn advice(self) -> String {
        match self {
            Policy::UnderscorePrefix => {
                "Underscore-prefixed names are not allowed in this project.\n   Either use the binding (dropping the underscore) or remove it.\n".to_string()
            }
            Policy::ForbiddenComment => format!(
                "Comments containing any of {:?} are not allowed.\n   The '**' pattern is only allowed in doc comments.\n",
                FORBIDDEN_WORDS
            ),
            Policy::UppercaseComment => {
                "Comments whose alphabetic characters are all uppercase are not allowed.\n"
                    .to_string()
            }
            Policy::AllowDeadCode => {
                "#[allow(dead_code)] is not allowed.\n   Either use the code or delete it.\n"
                    .to_string()
            }
        }
    }
}

// Collects matching lines from one file and turns them into a build error.
struct Collector {
    policy: Policy,
    file_path: PathBuf,
    violations: Vec<String>,
}

impl Collector {
    fn new(policy: Policy, file_path: &Path) -> Self {
        Self {
            policy,
            file_path: file_path.to_path_buf(),
            violations: Vec::new(),
        }
    }

    fn into_error(self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }
        let mut msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            self.policy.headline(),
            self.file_path.display()
        );
        for violation in &self.violations {
            msg.push_str(&format!("   {violation}\n"));
        }
        msg.push_str(&format!("\n⚠️ {}", self.policy.advice()));
        Some(msg)
    }

    // Decides whether a regex hit is a real violation for this policy.
    fn accepts(&self, line: &str) -> bool {
        let trimmed = line.trim_start();
        match self.policy {
            Policy::UnderscorePrefix => {
                let is_comment = trimmed.starts_with("//") || line.contains("/*");
                let in_string = line
                    .split('"')
                    .enumerate()
                    .any(|(i, part)| i % 2 == 1 && part.contains('_'));
                !is_comment && !in_string
            }
            Policy::ForbiddenComment => {
                let stars_only = trimmed.starts_with("///")
                    && line.contains("**")
                    && !FORBIDDEN_WORDS.iter().any(|w| line.contains(w));
                !stars_only
            }
            Policy::UppercaseComment => match comment_text(line) {
                Some(text) => {
                    let mut letters = text.chars().filter(|c| c.is_alphabetic()).peekable();
                    letters.peek().is_some() && letters.all(|c| c.is_uppercase())
                }
                None => false,
            },
            Policy::AllowDeadCode => true,
        }
    }
}

impl Sink for Collector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if self.accepts(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn comment_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix("///") {
        return Some(rest.trim());
    }
    if let Some(rest) = trimmed.strip_prefix("//") {
        return Some(rest.trim());
    }
    let start = line.find("/*")?;
    let body = &line[start + 2..];
    Some(match body.find("*/") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    })
}

// Every Rust source of this crate. The vendored reference pack under
// `examples/` and build output are not ours to police.
fn rust_sources(include_build_script: bool) -> Vec<PathBuf> {
    WalkDir::new(".")
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| !e.path().starts_with("./target") && !e.path().starts_with("./examples"))
        .filter(|e| include_build_script || e.file_name() != "build.rs")
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect()
}

fn scan(policy: Policy, pattern: &str, include_build_script: bool) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(pattern)?;
    let mut searcher = Searcher::new();
    for path in rust_sources(include_build_script) {
        if std::fs::read_to_string(&path).is_err() {
            continue;
        }
        let mut collector = Collector::new(policy, &path);
        searcher.search_path(&matcher, &path, &mut collector)?;
        if let Some(message) = collector.into_error() {
            return Err(message.into());
        }
    }
    Ok(())
}

// Compiles build.rs on its own with the lints the library denies.
fn check_build_script_lints() {
    let out_dir = std::env::var("OUT_DIR")
        .unwrap_or_else(|_| std::env::temp_dir().display().to_string());
    let output = std::process::Command::new("rustc")
        .args([
            "--edition",
            "2021",
            "-D",
            "unused_variables",
            "-D",
            "dead_code",
            "-D",
            "unused_imports",
            "--crate-type",
            "bin",
            "--error-format",
            "human",
            "--out-dir",
            out_dir.as_str(),
            "build.rs",
        ])
        .output();

    match output {
        Ok(output) if !output.status.success() => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let offence = ["unused variable", "is never used", "unused import"]
                .into_iter()
                .find(|needle| stderr.contains(needle));
            if let Some(offence) = offence {
                eprintln!("\n❌ ERROR: build.rs has an {offence} lint violation!\n{stderr}");
                std::process::exit(1);
            }
        }
        Ok(_) => {}
        Err(e) => {
            println!("cargo:warning=Could not lint build.rs with rustc: {e}");
        }
    }
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in ["chaos", "cli", "tests", "benches"] {
        println!("cargo:rerun-if-changed={dir}");
    }

    check_build_script_lints();

    let forbidden_words = format!("(//|/\\*|///).*(?:{})", FORBIDDEN_WORDS.join("|"));
    let scans: [(Policy, &str, bool); 5] = [
        (Policy::UnderscorePrefix, r"\b(_[a-zA-Z0-9_]+)\b", true),
        (Policy::ForbiddenComment, forbidden_words.as_str(), false),
        (Policy::ForbiddenComment, r"(//|/\*).*\*\*", false),
        (Policy::UppercaseComment, r"(//|/\*|///).*", false),
        (
            Policy::AllowDeadCode,
            r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
            false,
        ),
    ];

    for (policy, pattern, include_build_script) in scans {
        if let Err(e) = scan(policy, pattern, include_build_script) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
