//! Completion artifact writer (§4.E): on reaching `completed`, `best_code`
//! is written to disk alongside a README, a minimal package manifest, and a
//! start script generated from fixed templates parameterized by
//! `worker_id` and the task prompt.

use std::io;
use std::path::{Path, PathBuf};

/// Where `write` landed each file, plus the served URL the caller reports
/// back in its status/response.
#[derive(Debug, Clone)]
pub struct CompletionArtifact {
    pub code_path: PathBuf,
    pub readme_path: PathBuf,
    pub manifest_path: PathBuf,
    pub start_script_path: PathBuf,
    pub served_url: String,
}

fn readme_template(worker_id: &str, specialization_tag: &str, task: &str) -> String {
    format!(
        "# Worker {worker_id} — {specialization_tag}\n\n\
         Generated by the Grunts worker loop.\n\n\
         ## Task\n\n{task}\n\n\
         ## Running\n\n```\n./start.sh\n```\n"
    )
}

fn manifest_template(worker_id: &str) -> String {
    format!(
        "{{\n  \"name\": \"grunts-worker-{worker_id}\",\n  \"version\": \"0.0.0\",\n  \"private\": true\n}}\n"
    )
}

fn start_script_template(code_file_name: &str) -> String {
    format!("#!/bin/sh\nexec node {code_file_name}\n")
}

/// Write `best_code` and its auxiliary files into `workspace_dir`, creating
/// it if absent. The served URL is reported as `localhost:BASE_PORT+worker_id`
/// per §4.E, using the worker's own assigned port (already `BASE_PORT +
/// worker_id` by construction — see `grunts-orchestrator`'s port allocation).
pub fn write_completion_artifact(
    workspace_dir: &Path,
    worker_id: &str,
    specialization_tag: &str,
    task: &str,
    best_code: &str,
    port: u16,
) -> io::Result<CompletionArtifact> {
    std::fs::create_dir_all(workspace_dir)?;

    let code_file_name = "index.js";
    let code_path = workspace_dir.join(code_file_name);
    std::fs::write(&code_path, best_code)?;

    let readme_path = workspace_dir.join("README.md");
    std::fs::write(&readme_path, readme_template(worker_id, specialization_tag, task))?;

    let manifest_path = workspace_dir.join("package.json");
    std::fs::write(&manifest_path, manifest_template(worker_id))?;

    let start_script_path = workspace_dir.join("start.sh");
    std::fs::write(&start_script_path, start_script_template(code_file_name))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&start_script_path)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&start_script_path, perms)?;
    }

    Ok(CompletionArtifact {
        code_path,
        readme_path,
        manifest_path,
        start_script_path,
        served_url: format!("localhost:{port}"),
    })
}
