use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::process::Output;

use log::{debug, info};
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::job::template::JobDescription;
use crate::slurm::queue::{JobId, QueueAdapter, TerminalState};
use crate::slurm::script;

/// sacct is asked about at most this many jobs per call
const SACCT_CHUNK: usize = 500;

/// Command lines used to reach Slurm
///
/// Each entry is a program followed by leading arguments, so a site can point at wrappers
/// (e.g. `ssh login-node sbatch`).
#[derive(Debug, Clone)]
pub struct SlurmCommands {
    pub sbatch: Vec<String>,
    pub squeue: Vec<String>,
    pub sacct: Vec<String>,
}

impl Default for SlurmCommands {
    fn default() -> Self {
        SlurmCommands {
            sbatch: vec!["sbatch".to_string()],
            squeue: vec!["squeue".to_string()],
            sacct: vec!["sacct".to_string()],
        }
    }
}

/// [`QueueAdapter`] backed by the Slurm command line tools
#[derive(Debug, Clone, Default)]
pub struct SlurmQueue {
    commands: SlurmCommands,
}

impl SlurmQueue {
    pub fn new(commands: SlurmCommands) -> Self {
        SlurmQueue { commands }
    }
}

impl QueueAdapter for SlurmQueue {
    async fn queued_count(&self, user: &str, partition: Option<&str>) -> Result<usize> {
        let mut arguments = vec!["-h", "-o", "%i", "-u", user];
        if let Some(partition) = partition {
            arguments.extend(["-p", partition]);
        }

        let output = run(&self.commands.squeue, &arguments)
            .await
            .map_err(Error::QueueQuery)?;
        let count = count_lines(&output);
        debug!("{count} job(s) queued for user {user}");
        Ok(count)
    }

    async fn submit_one(
        &self,
        name: &str,
        job: &JobDescription,
        partition: Option<&str>,
    ) -> Result<JobId> {
        let submission_error = |detail: String| Error::Submission {
            job: name.to_string(),
            detail,
        };

        let script = script::render(name, job)
            .map_err(|err| submission_error(format!("cannot render batch script: {err}")))?;

        // sbatch copies the script, the file can go once the command returns
        let mut file = tempfile::Builder::new()
            .prefix("slurm_throttle_")
            .suffix(".sh")
            .tempfile()
            .map_err(|err| submission_error(format!("cannot create batch script: {err}")))?;
        file.write_all(script.content.as_bytes())
            .map_err(|err| submission_error(format!("cannot write batch script: {err}")))?;
        let script_path = file.path().display().to_string();

        let mut arguments = vec!["--parsable"];
        if let Some(partition) = partition {
            arguments.extend(["-p", partition]);
        }
        arguments.push(&script_path);

        let output = run(&self.commands.sbatch, &arguments)
            .await
            .map_err(submission_error)?;
        let id = parse_sbatch_output(&output).map_err(submission_error)?;
        info!("Submitted job {name} as Slurm job {id}");
        Ok(id)
    }

    async fn status_of(&self, ids: &[JobId]) -> Result<HashMap<JobId, TerminalState>> {
        let requested: HashSet<JobId> = ids.iter().copied().collect();
        let mut states = HashMap::new();

        for chunk in ids.chunks(SACCT_CHUNK) {
            let list = chunk
                .iter()
                .map(JobId::to_string)
                .collect::<Vec<_>>()
                .join(",");
            let arguments = ["-n", "-P", "-X", "-o", "JobID,State", "-j", list.as_str()];

            let output = run(&self.commands.sacct, &arguments)
                .await
                .map_err(Error::QueueQuery)?;
            for (id, state) in parse_sacct_output(&output) {
                if requested.contains(&id) {
                    states.insert(id, state);
                }
            }
        }

        debug!("{} of {} job(s) are in a terminal state", states.len(), ids.len());
        Ok(states)
    }
}

/// Run a Slurm command and return its stdout, or a diagnostic with exit code and output
async fn run(command_line: &[String], arguments: &[&str]) -> std::result::Result<String, String> {
    let (program, leading) = command_line
        .split_first()
        .ok_or_else(|| "empty command line".to_string())?;

    let mut command = Command::new(program);
    command.args(leading).args(arguments);
    // outside the terminal's process group, so Ctrl-C never kills a submission in flight
    command.process_group(0);
    debug!("Running Slurm command `{} {}`", command_line.join(" "), arguments.join(" "));

    let output = command
        .output()
        .await
        .map_err(|err| format!("cannot run `{program}`: {err}"))?;
    let output = check_command_output(program, output)?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn check_command_output(program: &str, output: Output) -> std::result::Result<Output, String> {
    let status = output.status;
    if !status.success() {
        let code = status
            .code()
            .map(|code| code.to_string())
            .unwrap_or_else(|| "none (killed by signal)".to_string());
        return Err(format!(
            "`{program}` failed with exit code {code}\nstderr: {}\nstdout: {}",
            String::from_utf8_lossy(&output.stderr).trim(),
            String::from_utf8_lossy(&output.stdout).trim()
        ));
    }
    Ok(output)
}

fn count_lines(output: &str) -> usize {
    output.lines().filter(|line| !line.trim().is_empty()).count()
}

/// `sbatch --parsable` prints `<job id>` or `<job id>;<cluster>`
fn parse_sbatch_output(output: &str) -> std::result::Result<JobId, String> {
    let output = output.trim();
    output
        .split(';')
        .next()
        .and_then(|id| id.trim().parse::<u64>().ok())
        .map(JobId)
        .ok_or_else(|| format!("missing job id in sbatch output {output:?}"))
}

/// Parse `JobID|State` lines of `sacct -n -P -X -o JobID,State`
fn parse_sacct_output(output: &str) -> Vec<(JobId, TerminalState)> {
    output
        .lines()
        .filter_map(|line| {
            let (id, state) = line.trim().split_once('|')?;
            let id = id.parse::<u64>().ok().map(JobId)?;
            let state = terminal_state(state.split_whitespace().next()?)?;
            Some((id, state))
        })
        .collect()
}

/// Map a Slurm job state to a terminal state, `None` while the job is still alive
fn terminal_state(state: &str) -> Option<TerminalState> {
    match state {
        "PENDING" | "RUNNING" | "REQUEUED" | "RESIZING" | "SUSPENDED" | "COMPLETING"
        | "CONFIGURING" | "REQUEUE_HOLD" | "REQUEUE_FED" | "SIGNALING" | "STAGE_OUT" => None,
        "COMPLETED" => Some(TerminalState::CompletedOk),
        // FAILED, CANCELLED, TIMEOUT, NODE_FAIL, OUT_OF_MEMORY, BOOT_FAIL, DEADLINE, PREEMPTED
        _ => Some(TerminalState::Failed),
    }
}
