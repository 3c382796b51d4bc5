//! Shell command classification
//!
//! Heuristic, prefix/keyword based. A command is read-only only when every
//! segment of every pipeline and sequence runs a known read-only program and
//! no output is redirected anywhere but `/dev/null`. Anything unrecognized
//! counts as mutating.
//!
//! Wrappers (`env`, `xargs`, `nice`, `timeout`, `sudo`, `doas`) are peeled off
//! first, so every check sees the program that actually runs. Scripts passed
//! to `sh -c`, `su -c` and `eval` are analyzed again for dangers and mode
//! changes.

use std::collections::HashSet;
use std::fmt;

/// Programs that never modify the filesystem on their own
const READ_ONLY_PROGRAMS: &[&str] = &[
    "basename", "cat", "cd", "cmp", "column", "cut", "date", "df", "diff", "dirname", "du",
    "echo", "egrep", "false", "fd", "fgrep", "file", "grep", "head", "hexdump",
    "hostname", "id", "jq", "less", "ls", "md5sum", "more", "nl", "od", "printenv", "printf",
    "ps", "pwd", "readlink", "realpath", "rev", "rg", "sha1sum", "sha256sum", "sort", "stat",
    "strings", "tac", "tail", "test", "tr", "tree", "true", "type", "uname", "uniq", "wc",
    "whereis", "which", "whoami", "xxd", "[",
];

const GIT_READ_ONLY: &[&str] = &[
    "blame", "cat-file", "describe", "diff", "grep", "log", "ls-files", "ls-tree", "reflog",
    "rev-list", "rev-parse", "shortlog", "show", "status",
];

const CARGO_READ_ONLY: &[&str] = &["metadata", "search", "tree", "--version", "-V"];

const SHELLS: &[&str] = &["sh", "bash", "zsh", "dash", "fish", "ksh"];

const PRIVILEGE_PROGRAMS: &[&str] = &["sudo", "su", "doas"];

/// Stand-in target for `xargs duet mode set`, whose target arrives on stdin
const XARGS_INPUT: &str = "<arguments read by xargs>";

/// A program that runs the rest of its command line as another command
struct Wrapper {
    program: &'static str,
    /// Options that consume the following word
    value_options: &'static [&'static str],
    /// Positional words (`timeout`'s duration) before the wrapped command
    positionals: usize,
}

const WRAPPERS: &[Wrapper] = &[
    Wrapper {
        program: "env",
        value_options: &["-u", "--unset", "-C", "--chdir"],
        positionals: 0,
    },
    Wrapper {
        program: "xargs",
        value_options: &[
            "-a", "-d", "-E", "-I", "-L", "-n", "-P", "-s", "--arg-file", "--delimiter",
            "--max-args", "--max-chars", "--max-lines", "--max-procs",
        ],
        positionals: 0,
    },
    Wrapper {
        program: "nice",
        value_options: &["-n", "--adjustment"],
        positionals: 0,
    },
    Wrapper {
        program: "timeout",
        value_options: &["-k", "-s", "--kill-after", "--signal"],
        positionals: 1,
    },
    Wrapper {
        program: "sudo",
        value_options: &["-C", "-D", "-g", "-h", "-p", "-R", "-r", "-T", "-t", "-U", "-u"],
        positionals: 0,
    },
    Wrapper {
        program: "doas",
        value_options: &["-C", "-u"],
        positionals: 0,
    },
];

impl Wrapper {
    fn find(program: &str) -> Option<&'static Wrapper> {
        WRAPPERS.iter().find(|w| w.program == program)
    }
}

/// What a segment actually runs once its wrappers are peeled off
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Invocation {
    words: Vec<String>,
    privileged: bool,
    /// Extra arguments may be appended from stdin
    via_xargs: bool,
}

impl Invocation {
    fn resolve(words: &[String]) -> Self {
        let mut invocation = Self::default();
        let mut words = strip_assignments(words).to_vec();

        loop {
            let Some(wrapper) = words.first().and_then(|w| Wrapper::find(&program_name(w))) else {
                break;
            };
            let args = &words[1..];
            let mut split = Vec::new();
            let mut i = 0;

            while let Some(arg) = args.get(i) {
                if !arg.starts_with('-') {
                    break;
                }
                i += 1;
                if arg == "--" {
                    break;
                }
                if wrapper.program == "env" {
                    if let Some((script, consumed)) = env_split_string(arg, args.get(i)) {
                        i += consumed;
                        split = script.split_whitespace().map(str::to_string).collect();
                        break;
                    }
                }
                if wrapper.value_options.contains(&arg.as_str()) {
                    i += 1;
                }
            }
            i += wrapper.positionals;

            match wrapper.program {
                "xargs" => invocation.via_xargs = true,
                p if PRIVILEGE_PROGRAMS.contains(&p) => invocation.privileged = true,
                _ => {}
            }

            split.extend(args.get(i..).unwrap_or_default().iter().cloned());
            words = strip_assignments(&split).to_vec();
        }

        invocation.words = words;
        invocation
    }

    fn program(&self) -> Option<String> {
        self.words.first().map(|w| program_name(w))
    }
}

/// `env -S <string>` / `--split-string=<string>`: the value and how many extra words it took
fn env_split_string(arg: &str, next: Option<&String>) -> Option<(String, usize)> {
    if arg == "-S" || arg == "--split-string" {
        return Some((next.cloned().unwrap_or_default(), usize::from(next.is_some())));
    }
    if let Some(value) = arg.strip_prefix("--split-string=") {
        return Some((value.to_string(), 0));
    }
    arg.strip_prefix("-S").map(|value| (value.to_string(), 0))
}

/// Risky operation spotted in a command, reported even when it is allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Danger {
    RecursiveDelete,
    PrivilegeEscalation,
    CodeEvaluation,
    PipeToShell,
}

impl Danger {
    pub fn description(&self) -> &'static str {
        match self {
            Self::RecursiveDelete => "recursive delete",
            Self::PrivilegeEscalation => "privilege escalation",
            Self::CodeEvaluation => "dynamic code evaluation",
            Self::PipeToShell => "downloaded content piped into a shell",
        }
    }
}

impl fmt::Display for Danger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Result of classifying one shell command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandAnalysis {
    /// Segments that may modify state, as written
    pub mutating_segments: Vec<String>,
    /// Dangerous operations, deduplicated, in order of appearance
    pub dangers: Vec<Danger>,
    /// Targets of `duet mode set <target>` invocations
    pub mode_commands: Vec<String>,
}

impl CommandAnalysis {
    pub fn is_read_only(&self) -> bool {
        self.mutating_segments.is_empty()
    }

    fn flag(&mut self, danger: Danger) {
        if !self.dangers.contains(&danger) {
            self.dangers.push(danger);
        }
    }
}

/// How a segment is joined to the one before it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Joiner {
    Start,
    Pipe,
    Sequence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    text: String,
    words: Vec<String>,
    redirects: Vec<String>,
    joiner: Joiner,
}

/// Classifies shell commands as read-only or mutating
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    read_only: HashSet<String>,
}

impl Default for CommandClassifier {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl CommandClassifier {
    /// Built-in read-only programs plus `extra`
    pub fn new(extra: &[String]) -> Self {
        let read_only = READ_ONLY_PROGRAMS
            .iter()
            .map(|p| p.to_string())
            .chain(extra.iter().map(|p| p.trim().to_string()))
            .filter(|p| !p.is_empty())
            .collect();
        Self { read_only }
    }

    pub fn analyze(&self, command: &str) -> CommandAnalysis {
        let mut analysis = CommandAnalysis::default();
        let segments = split_segments(command);
        let mut previous_program: Option<String> = None;

        for segment in &segments {
            let invocation = Invocation::resolve(&segment.words);
            let program = invocation.program();

            if let Some(target) = mode_command_target(&invocation) {
                analysis.mode_commands.push(target);
            }

            if invocation.privileged || program.as_deref() == Some("su") {
                analysis.flag(Danger::PrivilegeEscalation);
            }
            self.flag_dangers(
                &mut analysis,
                &invocation.words,
                segment.joiner,
                previous_program.as_deref(),
            );

            if let Some(script) = embedded_script(&invocation.words) {
                let inner = self.analyze(&script);
                analysis.mode_commands.extend(inner.mode_commands);
                for danger in inner.dangers {
                    analysis.flag(danger);
                }
            }

            let writes_output = segment.redirects.iter().any(|t| t != "/dev/null");
            if writes_output
                || invocation.privileged
                || !self.is_read_only_invocation(&invocation.words)
            {
                analysis.mutating_segments.push(segment.text.clone());
            }

            previous_program = program;
        }

        analysis
    }

    fn is_read_only_invocation(&self, words: &[String]) -> bool {
        let Some(first) = words.first() else {
            // Empty segment (trailing `;`), or a bare `env`/`xargs`
            return true;
        };
        let program = program_name(first);
        let args = &words[1..];

        match program.as_str() {
            "git" => args
                .iter()
                .find(|a| !a.starts_with('-'))
                .map(|sub| {
                    GIT_READ_ONLY.contains(&sub.as_str()) || git_listing(sub, args)
                })
                .unwrap_or(true),
            "cargo" => args
                .first()
                .map(|sub| CARGO_READ_ONLY.contains(&sub.as_str()))
                .unwrap_or(true),
            "sed" => !args
                .iter()
                .any(|a| a == "-i" || a.starts_with("-i") || a.starts_with("--in-place")),
            "find" => !args.iter().any(|a| {
                matches!(
                    a.as_str(),
                    "-delete" | "-exec" | "-execdir" | "-ok" | "-okdir" | "-fprint"
                )
            }),
            "sort" => !args.iter().any(|a| a == "-o" || a.starts_with("--output")),
            // Mode changes go through the store; self-authorization is checked separately
            "duet" => matches!(
                args.iter().find(|a| !a.starts_with('-')).map(String::as_str),
                Some("mode") | Some("events")
            ),
            other => self.read_only.contains(other),
        }
    }

    fn flag_dangers(
        &self,
        analysis: &mut CommandAnalysis,
        words: &[String],
        joiner: Joiner,
        previous_program: Option<&str>,
    ) {
        let Some(first) = words.first() else {
            return;
        };
        let program = program_name(first);
        let args = &words[1..];

        match program.as_str() {
            "rm" if args.iter().any(|a| is_recursive_flag(a)) => {
                analysis.flag(Danger::RecursiveDelete)
            }
            "eval" | "exec" | "source" | "." => analysis.flag(Danger::CodeEvaluation),
            shell if SHELLS.contains(&shell) => {
                if args.iter().any(|a| a == "-c") {
                    analysis.flag(Danger::CodeEvaluation);
                }
                if joiner == Joiner::Pipe
                    && matches!(previous_program, Some("curl") | Some("wget"))
                {
                    analysis.flag(Danger::PipeToShell);
                }
            }
            "python" | "python3" | "perl" | "ruby" | "node" | "deno"
                if args.iter().any(|a| a == "-c" || a == "-e") =>
            {
                analysis.flag(Danger::CodeEvaluation)
            }
            _ => {}
        }
    }

    /// Whether `command` mentions `path` anywhere in its text
    pub fn references(command: &str, path: &str) -> bool {
        !path.is_empty() && command.contains(path)
    }
}

fn is_recursive_flag(arg: &str) -> bool {
    if arg == "--recursive" {
        return true;
    }
    arg.starts_with('-')
        && !arg.starts_with("--")
        && arg.chars().skip(1).any(|c| c == 'r' || c == 'R')
}

/// `git branch` / `git tag` / `git remote` without arguments only list
fn git_listing(sub: &str, args: &[String]) -> bool {
    let rest: Vec<&String> = args.iter().skip_while(|a| a.as_str() != sub).skip(1).collect();
    match sub {
        "branch" | "tag" | "remote" | "stash" => rest.iter().all(|a| {
            matches!(
                a.as_str(),
                "-a" | "--all" | "-r" | "--remotes" | "-v" | "-vv" | "--list" | "-l" | "list"
            )
        }),
        _ => false,
    }
}

fn program_name(word: &str) -> String {
    word.rsplit('/').next().unwrap_or(word).to_string()
}

fn strip_assignments(words: &[String]) -> &[String] {
    let skip = words
        .iter()
        .take_while(|w| {
            w.split_once('=')
                .map(|(name, _)| {
                    !name.is_empty()
                        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                })
                .unwrap_or(false)
        })
        .count();
    &words[skip..]
}

/// Target of a `duet mode set <target>` segment
fn mode_command_target(invocation: &Invocation) -> Option<String> {
    let words = &invocation.words;
    if program_name(words.first()?) != "duet" {
        return None;
    }
    let positional: Vec<&String> = words[1..].iter().filter(|w| !w.starts_with('-')).collect();
    match positional.as_slice() {
        [mode, set, target, ..] if mode.as_str() == "mode" && set.as_str() == "set" => {
            Some(target.to_string())
        }
        [mode, set] if mode.as_str() == "mode" && set.as_str() == "set" && invocation.via_xargs => {
            Some(XARGS_INPUT.to_string())
        }
        _ => None,
    }
}

/// Script text a shell, `su` or `eval` will run
fn embedded_script(words: &[String]) -> Option<String> {
    let program = program_name(words.first()?);
    let args = &words[1..];
    match program.as_str() {
        "eval" if !args.is_empty() => Some(args.join(" ")),
        "su" => script_after(args, &["-c", "--command"]),
        shell if SHELLS.contains(&shell) => script_after(args, &["-c"]),
        _ => None,
    }
}

fn script_after(args: &[String], flags: &[&str]) -> Option<String> {
    let idx = args.iter().position(|a| flags.contains(&a.as_str()))?;
    args.get(idx + 1).cloned()
}

/// Split a command line into pipeline/sequence segments, honoring quotes
fn split_segments(command: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut builder = SegmentBuilder::new(Joiner::Start);
    let mut chars = command.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            } else if c == '\\' && q == '"' {
                if let Some(next) = chars.next() {
                    builder.push_char(next);
                    builder.text.push(c);
                    builder.text.push(next);
                    continue;
                }
            } else {
                builder.push_char(c);
            }
            builder.text.push(c);
            continue;
        }

        match c {
            '\'' | '"' => {
                quote = Some(c);
                builder.quoted = true;
                builder.text.push(c);
            }
            '\\' => {
                builder.text.push(c);
                if let Some(next) = chars.next() {
                    builder.push_char(next);
                    builder.text.push(next);
                }
            }
            '|' => {
                let joiner = if chars.peek() == Some(&'|') {
                    chars.next();
                    Joiner::Sequence
                } else {
                    Joiner::Pipe
                };
                segments.push(builder.finish());
                builder = SegmentBuilder::new(joiner);
            }
            '&' if chars.peek() == Some(&'>') => {
                chars.next();
                if chars.peek() == Some(&'>') {
                    chars.next();
                }
                builder.text.push_str("&>");
                builder.begin_redirect();
            }
            '&' | ';' | '\n' => {
                if c == '&' && chars.peek() == Some(&'&') {
                    chars.next();
                }
                segments.push(builder.finish());
                builder = SegmentBuilder::new(Joiner::Sequence);
            }
            '>' => {
                builder.text.push(c);
                // Trailing descriptor digits belong to the redirect, not the word
                if builder.current.chars().all(|d| d.is_ascii_digit()) && !builder.quoted {
                    builder.current.clear();
                }
                if chars.peek() == Some(&'>') {
                    chars.next();
                    builder.text.push('>');
                }
                if chars.peek() == Some(&'&') {
                    // Descriptor duplication (`2>&1`) writes no file
                    chars.next();
                    builder.text.push('&');
                    while let Some(d) = chars.peek().copied().filter(|d| d.is_ascii_digit() || *d == '-') {
                        chars.next();
                        builder.text.push(d);
                    }
                    builder.end_word();
                } else {
                    builder.begin_redirect();
                }
            }
            c if c.is_whitespace() => {
                builder.text.push(c);
                builder.end_word();
            }
            _ => {
                builder.push_char(c);
                builder.text.push(c);
            }
        }
    }

    segments.push(builder.finish());
    segments
        .into_iter()
        .filter(|s| !s.words.is_empty() || !s.redirects.is_empty())
        .collect()
}

struct SegmentBuilder {
    text: String,
    words: Vec<String>,
    redirects: Vec<String>,
    current: String,
    quoted: bool,
    redirect_pending: bool,
    joiner: Joiner,
}

impl SegmentBuilder {
    fn new(joiner: Joiner) -> Self {
        Self {
            text: String::new(),
            words: Vec::new(),
            redirects: Vec::new(),
            current: String::new(),
            quoted: false,
            redirect_pending: false,
            joiner,
        }
    }

    fn push_char(&mut self, c: char) {
        self.current.push(c);
    }

    fn begin_redirect(&mut self) {
        self.end_word();
        self.redirect_pending = true;
    }

    fn end_word(&mut self) {
        if self.current.is_empty() && !self.quoted {
            return;
        }
        let word = std::mem::take(&mut self.current);
        self.quoted = false;
        if self.redirect_pending {
            self.redirects.push(word);
            self.redirect_pending = false;
        } else {
            self.words.push(word);
        }
    }

    fn finish(mut self) -> Segment {
        self.end_word();
        if self.redirect_pending {
            // `>` with no target; treat as writing somewhere
            self.redirects.push(String::new());
        }
        Segment {
            text: self.text.trim().to_string(),
            words: self.words,
            redirects: self.redirects,
            joiner: self.joiner,
        }
    }
}
