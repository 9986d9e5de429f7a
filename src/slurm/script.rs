use chrono::Utc;
use log::warn;
use serde::Serialize;
use tinytemplate::TinyTemplate;

use crate::job::template::{JobDescription, OptionValue};

/// A rendered batch script, ready to be passed to sbatch
///
/// The script runs the job in its own working directory below the submission directory:
/// - `#SBATCH` headers from the job options (always a single task)
/// - copying the executable (optional) and the input files to the working directory
/// - running the executable with its arguments
/// - moving the output files to their destinations
/// - removing the working directory, exiting with the first non-zero status
pub struct BatchScript {
    pub content: String,
}

/// Rendering context for the batch script
#[derive(Serialize)]
struct ScriptContext {
    name: String,
    time_now: String,
    options: String,
    executable: String,
    arguments: String,
    transfer_executable: bool,
    transfer_input_files: String,
    transfer_output_files: String,
}

/// Render a job description into a batch script using TinyTemplate
pub fn render(name: &str, job: &JobDescription) -> Result<BatchScript, tinytemplate::error::Error> {
    /// included batch script template
    static SCRIPT: &str =
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/job.sh"));
    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&tinytemplate::format_unescaped);
    tt.add_template("job", SCRIPT)?;

    let context = ScriptContext {
        name: name.to_string(),
        time_now: Utc::now().to_string(),
        options: sbatch_headers(name, job).join("\n"),
        executable: quote(job.executable()),
        arguments: job.arguments().to_string(),
        transfer_executable: job.transfer_executable(),
        transfer_input_files: quote_all(job.transfer_input_files()),
        transfer_output_files: quote_all(job.transfer_output_files()),
    };

    Ok(BatchScript { content: tt.render("job", &context)? })
}

/// `#SBATCH` lines for the job options
///
/// `true` options are written as bare flags (`--exclusive`), `false` ones are left out.
/// `job-name` defaults to the name of the job in its collection.
fn sbatch_headers(name: &str, job: &JobDescription) -> Vec<String> {
    let mut headers = Vec::new();
    if job.options().get("job-name").is_none() {
        headers.push(format!("#SBATCH --job-name={name}"));
    }

    for (key, value) in job.options().iter() {
        if key == "ntasks" {
            continue;
        }
        match value {
            OptionValue::Bool(true) => headers.push(format!("#SBATCH --{key}")),
            OptionValue::Bool(false) => {}
            value => headers.push(format!("#SBATCH --{key}={value}")),
        }
    }

    // every job is a single task
    match job.options().get("ntasks") {
        None | Some(OptionValue::Integer(1)) => {}
        Some(other) => warn!("Job {name} asks for ntasks={other}, submitting it with ntasks=1"),
    }
    headers.push("#SBATCH --ntasks=1".to_string());
    headers
}

fn quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}

fn quote_all(words: &[String]) -> String {
    words.iter().map(|word| quote(word)).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::macros::{MacroValue, Macros};
    use crate::job::template::JobTemplate;

    fn description() -> JobDescription {
        let mut template = JobTemplate::new("/opt/bin/reco");
        template.arguments = "--in {macros[file]} --out out.i3".to_string();
        template.transfer_executable = true;
        template.options.insert("time".to_string(), OptionValue::from("01:00:00"));
        template.options.insert("exclusive".to_string(), OptionValue::Bool(true));
        template.options.insert("requeue".to_string(), OptionValue::Bool(false));
        template.options.insert("ntasks".to_string(), OptionValue::Integer(4));
        template.transfer_input_files = vec!["/data/{macros[file]}".to_string()];
        template.transfer_output_files = vec!["/results/it's.i3".to_string()];

        let macros: Macros = [("file".to_string(), MacroValue::from("run_1.i3"))]
            .into_iter()
            .collect();
        template.expand(&macros).unwrap()
    }

    #[test]
    fn test_headers() {
        let headers = sbatch_headers("job_1", &description());
        assert_eq!(
            headers,
            [
                "#SBATCH --job-name=job_1",
                "#SBATCH --time=01:00:00",
                "#SBATCH --exclusive",
                "#SBATCH --ntasks=1",
            ]
        );
    }

    #[test]
    fn test_render_script() {
        let script = render("job_1", &description()).unwrap().content;

        assert!(script.starts_with("#!/usr/bin/env bash\n#SBATCH --job-name=job_1\n"));
        assert!(script.contains("# job job_1, generated at "));
        assert!(script.contains("executable='/opt/bin/reco'\n"));
        assert!(script.contains("transfer_executable=true\n"));
        assert!(script.contains("\"$executable\" --in run_1.i3 --out out.i3\n"));
        assert!(script.contains("for inputfile in '/data/run_1.i3'\n"));
        assert!(script.contains(r"for outputfile in '/results/it'\''s.i3'"));
        // no HTML escaping
        assert!(!script.contains("&quot;"));
    }

    #[test]
    fn test_render_without_transfers() {
        let job = JobTemplate::new("hostname").expand(&Macros::new()).unwrap();
        let script = render("plain", &job).unwrap().content;
        assert!(script.contains("transfer_executable=false\n"));
        assert!(script.contains("for inputfile in \ndo"));
    }
}
