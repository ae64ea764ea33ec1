use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::TRAC_REMOTE;
use crate::domain::release::parse_tag_decorations;
use crate::error::{AppError, AppResult};
use crate::services::VersionControlService;

const WARNING: &str = "\x1b[93m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagValue {
    Switch(bool),
    Value(String),
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        FlagValue::Switch(value)
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        FlagValue::Value(value.to_string())
    }
}

impl From<String> for FlagValue {
    fn from(value: String) -> Self {
        FlagValue::Value(value)
    }
}

/// One git invocation: subcommand, keyword flags, positional arguments and
/// environment overrides.
#[derive(Debug, Clone)]
pub struct GitCommand {
    subcommand: String,
    args: Vec<String>,
    flags: Vec<(String, FlagValue)>,
    env: Vec<(String, String)>,
}

impl GitCommand {
    pub fn new(subcommand: impl Into<String>) -> Self {
        Self {
            subcommand: subcommand.into(),
            args: Vec::new(),
            flags: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn flag(mut self, name: &str, value: impl Into<FlagValue>) -> Self {
        self.flags.push((name.to_string(), value.into()));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Arguments after the program name.
    ///
    /// `x` becomes `-x`, `long_name` becomes `--long-name`; `true` emits the
    /// bare flag, `false` omits it and a string value emits `flag=value`.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = vec![self.subcommand.clone()];
        for (name, value) in &self.flags {
            let flag = if name.chars().count() == 1 {
                format!("-{name}")
            } else {
                format!("--{}", name.replace('_', "-"))
            };
            match value {
                FlagValue::Switch(true) => argv.push(flag),
                FlagValue::Switch(false) => {}
                FlagValue::Value(value) => argv.push(format!("{flag}={value}")),
            }
        }
        argv.extend(self.args.iter().cloned());
        argv
    }
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub command_line: String,
}

pub struct GitCli {
    program: String,
    workspace_root: PathBuf,
}

impl GitCli {
    pub fn with_program(program: impl Into<String>, workspace_root: PathBuf) -> Self {
        Self {
            program: program.into(),
            workspace_root,
        }
    }

    /// Runs the command and returns its stdout.
    pub async fn execute(&self, command: GitCommand) -> AppResult<String> {
        Ok(self.run(&command, true).await?.stdout)
    }

    /// Runs the command, dropping its output unless it fails.
    pub async fn silent(&self, command: GitCommand) -> AppResult<()> {
        self.run(&command, true).await?;
        Ok(())
    }

    /// Runs the command and shows its output like the git command line would.
    pub async fn echo(&self, command: GitCommand) -> AppResult<()> {
        let result = self.run(&command, true).await?;
        if !result.stdout.is_empty() {
            print!("{}", result.stdout);
        }
        if !result.stderr.is_empty() {
            eprint!("{WARNING}{}{RESET}", result.stderr);
        }
        Ok(())
    }

    /// Runs the command and returns its exit code without failing on nonzero.
    pub async fn exit_code(&self, command: GitCommand) -> AppResult<i32> {
        Ok(self.run(&command, false).await?.exit_code)
    }

    pub async fn run(&self, command: &GitCommand, exit_code_to_error: bool) -> AppResult<CommandResult> {
        let argv = command.argv();
        let command_line = std::iter::once(self.program.as_str())
            .chain(argv.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        debug!("cmd = {command_line}");

        let output = Command::new(&self.program)
            .args(&argv)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&self.workspace_root)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| {
                AppError::Io(io::Error::new(
                    err.kind(),
                    format!("failed to execute \"{command_line}\": {err}"),
                ))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        log_lines("stdout", &stdout);
        log_lines("stderr", &stderr);

        let result = CommandResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout,
            stderr,
            command_line,
        };

        if exit_code_to_error && result.exit_code != 0 {
            return Err(AppError::CommandFailed {
                exit_code: result.exit_code,
                command: result.command_line,
                stdout: result.stdout,
                stderr: result.stderr,
            });
        }
        Ok(result)
    }
}

fn log_lines(prefix: &str, text: &str) {
    for line in text.lines() {
        debug!("{prefix} = {line}");
    }
}

/// The working copy as seen through the trac remote.
pub struct GitRepository {
    git: GitCli,
}

impl GitRepository {
    pub fn new(git: GitCli) -> Self {
        Self { git }
    }
}

#[async_trait]
impl VersionControlService for GitRepository {
    async fn current_branch(&self) -> AppResult<String> {
        let result = self
            .git
            .run(&GitCommand::new("symbolic-ref").arg("HEAD"), false)
            .await?;
        if result.exit_code != 0 {
            return Err(AppError::InvalidBranchState(
                "unexpectedly, git is in a detached HEAD state".to_string(),
            ));
        }
        let head = result.stdout.trim();
        Ok(head.strip_prefix("refs/heads/").unwrap_or(head).to_string())
    }

    async fn has_local_branch(&self, branch: &str) -> AppResult<bool> {
        let code = self
            .git
            .exit_code(GitCommand::new("show-ref").arg(format!("refs/heads/{branch}")))
            .await?;
        Ok(code == 0)
    }

    async fn checkout(&self, branch: &str) -> AppResult<()> {
        self.git.silent(GitCommand::new("checkout").arg(branch)).await
    }

    async fn checkout_detached(&self, rev: &str) -> AppResult<()> {
        self.git
            .silent(GitCommand::new("checkout").flag("detach", true).arg(rev))
            .await
    }

    async fn fetch(&self, remote_branch: &str) -> AppResult<()> {
        self.git
            .echo(GitCommand::new("fetch").args([TRAC_REMOTE, remote_branch]))
            .await
    }

    async fn branch_from_fetch_head(&self, local_branch: &str) -> AppResult<()> {
        self.git
            .silent(GitCommand::new("branch").args([local_branch, "FETCH_HEAD"]))
            .await
    }

    async fn merge_fetch_head(&self) -> AppResult<()> {
        self.git.echo(GitCommand::new("merge").arg("FETCH_HEAD")).await
    }

    async fn push(&self, remote_branch: &str, force: bool) -> AppResult<()> {
        let refspec = format!("HEAD:refs/heads/{remote_branch}");
        self.git
            .echo(
                GitCommand::new("push")
                    .flag("force", force)
                    .args([TRAC_REMOTE, refspec.as_str()]),
            )
            .await
    }

    async fn set_upstream(&self, remote_branch: &str) -> AppResult<()> {
        // `branch --set-upstream-to` needs a refspec covering the remote branch
        let local = self.current_branch().await?;
        self.config_set(&format!("branch.{local}.remote"), TRAC_REMOTE)
            .await?;
        self.config_set(
            &format!("branch.{local}.merge"),
            &format!("refs/heads/{remote_branch}"),
        )
        .await
    }

    async fn diff_to_fetch_head(&self) -> AppResult<String> {
        self.git
            .execute(
                GitCommand::new("diff")
                    .flag("minimal", true)
                    .flag("color", "always")
                    .arg("FETCH_HEAD..HEAD"),
            )
            .await
    }

    async fn ensure_remote(&self, url: &str) -> AppResult<bool> {
        let code = self
            .git
            .exit_code(GitCommand::new("remote").args(["get-url", TRAC_REMOTE]))
            .await?;
        if code == 0 {
            return Ok(false);
        }
        self.git
            .silent(GitCommand::new("remote").args(["add", TRAC_REMOTE, url]))
            .await?;
        Ok(true)
    }

    async fn config_get(&self, key: &str) -> AppResult<Option<String>> {
        let result = self
            .git
            .run(&GitCommand::new("config").flag("get", true).arg(key), false)
            .await?;
        // exit code 1 means the key is not set
        match result.exit_code {
            0 => Ok(Some(result.stdout.trim().to_string()).filter(|value| !value.is_empty())),
            1 => Ok(None),
            exit_code => Err(AppError::CommandFailed {
                exit_code,
                command: result.command_line,
                stdout: result.stdout,
                stderr: result.stderr,
            }),
        }
    }

    async fn config_set(&self, key: &str, value: &str) -> AppResult<()> {
        self.git
            .silent(GitCommand::new("config").args([key, value]))
            .await
    }

    async fn merge_fetch_head_no_commit(&self) -> AppResult<()> {
        self.git
            .echo(
                GitCommand::new("merge")
                    .flag("no_ff", true)
                    .flag("no_commit", true)
                    .arg("FETCH_HEAD"),
            )
            .await
    }

    async fn status(&self) -> AppResult<String> {
        // merge outcomes are recognized by the untranslated status messages
        self.git
            .execute(GitCommand::new("status").env("LC_ALL", "C"))
            .await
    }

    async fn conflicted_files(&self) -> AppResult<Vec<String>> {
        let out = self
            .git
            .execute(
                GitCommand::new("diff")
                    .flag("name_only", true)
                    .flag("diff_filter", "U"),
            )
            .await?;
        Ok(out.lines().map(str::to_string).collect())
    }

    async fn abort_merge(&self) -> AppResult<()> {
        self.git
            .silent(GitCommand::new("merge").flag("abort", true))
            .await
    }

    async fn commit_from_file(
        &self,
        message_file: &Path,
        author: &str,
        allow_empty: bool,
    ) -> AppResult<()> {
        self.git
            .echo(
                GitCommand::new("commit")
                    .flag("file", message_file.display().to_string())
                    .flag("author", author)
                    .flag("allow_empty", allow_empty),
            )
            .await
    }

    async fn first_parent_log(
        &self,
        head: &str,
        exclude: Option<&str>,
        author: &str,
    ) -> AppResult<String> {
        let mut command = GitCommand::new("log")
            .flag("oneline", true)
            .flag("no_abbrev_commit", true)
            .flag("first_parent", true)
            .flag("author", author)
            .arg(head);
        if let Some(exclude) = exclude {
            command = command.arg(format!("^{exclude}"));
        }
        self.git.execute(command).await
    }

    async fn history_since_fetch_head(&self) -> AppResult<String> {
        self.git
            .execute(
                GitCommand::new("log")
                    .flag("oneline", true)
                    .flag("first_parent", true)
                    .arg("FETCH_HEAD~..HEAD"),
            )
            .await
    }

    async fn parents(&self, commit: &str) -> AppResult<Vec<String>> {
        let out = self
            .git
            .execute(
                GitCommand::new("show")
                    .flag("format", "%P")
                    .flag("no_patch", true)
                    .arg(commit),
            )
            .await?;
        Ok(out.split_whitespace().map(str::to_string).collect())
    }

    async fn tags_at_head(&self) -> AppResult<Vec<String>> {
        let out = self
            .git
            .execute(
                GitCommand::new("tag")
                    .flag("l", true)
                    .flag("points_at", "HEAD"),
            )
            .await?;
        Ok(out.lines().map(str::to_string).collect())
    }

    async fn first_parent_tags(&self) -> AppResult<Vec<String>> {
        let out = self
            .git
            .execute(
                GitCommand::new("log")
                    .flag("first_parent", true)
                    .flag("format", "%H%x09%D")
                    .arg("HEAD"),
            )
            .await?;
        parse_tag_decorations(&out).map_err(AppError::InvalidBranchState)
    }

    async fn push_tags(&self, branch: &str) -> AppResult<()> {
        self.git
            .echo(
                GitCommand::new("push")
                    .flag("tags", true)
                    .args([TRAC_REMOTE, branch]),
            )
            .await
    }

    async fn ancestry_log(&self, commit: &str) -> AppResult<String> {
        self.git
            .execute(
                GitCommand::new("log")
                    .flag("reverse", true)
                    .flag("format", "%H%n%an <%ae>%n%s")
                    .flag("ancestry_path", true)
                    .flag("z", true)
                    .args(["HEAD".to_string(), format!("^{commit}")]),
            )
            .await
    }

    async fn merged_branch_log(&self, merge_commit: &str, oneline: bool) -> AppResult<String> {
        self.git
            .execute(
                GitCommand::new("log")
                    .flag("oneline", oneline)
                    .arg(format!("{merge_commit}^1..{merge_commit}^2")),
            )
            .await
    }

    async fn rebase_onto(&self, upstream: &str, onto: &str) -> AppResult<()> {
        self.git
            .echo(
                GitCommand::new("rebase")
                    .flag("verbose", true)
                    .flag("rebase_merges", true)
                    .flag("onto", onto)
                    .arg(upstream),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell() -> GitCli {
        GitCli::with_program("sh", std::env::temp_dir())
    }

    #[test]
    fn renders_flags_before_arguments() {
        let command = GitCommand::new("log")
            .flag("oneline", true)
            .flag("no_abbrev_commit", true)
            .flag("verbose", false)
            .flag("author", "Release Manager")
            .flag("n", "5")
            .arg("HEAD");
        assert_eq!(
            command.argv(),
            vec![
                "log",
                "--oneline",
                "--no-abbrev-commit",
                "--author=Release Manager",
                "-n=5",
                "HEAD"
            ]
        );
    }

    #[test]
    fn single_character_switch_uses_single_dash() {
        let command = GitCommand::new("branch").flag("f", true).args(["a", "b"]);
        assert_eq!(command.argv(), vec!["branch", "-f", "a", "b"]);
    }

    #[tokio::test]
    async fn execute_returns_stdout() {
        let out = shell()
            .execute(GitCommand::new("-c").arg("echo hello"))
            .await
            .unwrap();
        assert_eq!(out, "hello\n");
    }

    #[tokio::test]
    async fn nonzero_exit_raises_command_failed() {
        let err = shell()
            .execute(GitCommand::new("-c").arg("echo oops >&2; exit 3"))
            .await
            .unwrap_err();
        match err {
            AppError::CommandFailed {
                exit_code,
                command,
                stderr,
                ..
            } => {
                assert_eq!(exit_code, 3);
                assert_eq!(command, "sh -c echo oops >&2; exit 3");
                assert_eq!(stderr, "oops\n");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn exit_code_mode_does_not_raise() {
        let code = shell()
            .exit_code(GitCommand::new("-c").arg("exit 3"))
            .await
            .unwrap();
        assert_eq!(code, 3);

        let result = shell()
            .run(&GitCommand::new("-c").arg("exit 4"), false)
            .await
            .unwrap();
        assert_eq!(result.exit_code, 4);
    }

    #[tokio::test]
    async fn silent_mode_drops_output_on_success() {
        assert!(shell().silent(GitCommand::new("-c").arg("echo hidden")).await.is_ok());
    }

    #[tokio::test]
    async fn silent_failure_keeps_the_reason() {
        let err = shell()
            .silent(GitCommand::new("-c").arg("echo 'error: pathspec did not match' >&2; exit 1"))
            .await
            .unwrap_err();
        match err {
            AppError::CommandFailed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, 1);
                assert_eq!(stderr, "error: pathspec did not match\n");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rebase_flags_render_like_git() {
        let command = GitCommand::new("rebase")
            .flag("verbose", true)
            .flag("rebase_merges", true)
            .flag("onto", "abc")
            .arg("def");
        assert_eq!(
            command.argv(),
            vec!["rebase", "--verbose", "--rebase-merges", "--onto=abc", "def"]
        );
    }

    #[tokio::test]
    async fn environment_overrides_reach_the_child() {
        let out = shell()
            .execute(
                GitCommand::new("-c")
                    .arg("printf %s \"$LC_ALL\"")
                    .env("LC_ALL", "C"),
            )
            .await
            .unwrap();
        assert_eq!(out, "C");
    }
}
