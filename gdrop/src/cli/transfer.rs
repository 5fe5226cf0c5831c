use std::path::{Path, PathBuf};
use std::process::ExitCode;

use client::ClientError;

pub async fn upload(uri: &str, files: &[PathBuf]) -> ExitCode {
    match client::upload_group(uri, files).await {
        Ok(summary) => {
            if let Some(group_id) = &summary.group_id {
                println!("Group          : {group_id}");
            }
            println!("Files          : {}", summary.files_count);
            println!("Total size     : {}", summary.total_size);
            match summary.error {
                Some(e) => {
                    eprintln!("upload stopped early: {e}");
                    ExitCode::FAILURE
                }
                None => ExitCode::SUCCESS,
            }
        }
        Err(e) => fail(&e),
    }
}

pub async fn info(uri: &str, group_id: &str) -> ExitCode {
    match client::group_info(uri, group_id).await {
        Ok(group) => {
            println!("Group          : {}", group.group_id);
            println!("Files          : {}", group.files_count);
            println!("Total size     : {}", group.total_size);
            println!("{}", client::group_table(&group));
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

pub async fn download(uri: &str, group_id: &str, dir: &Path) -> ExitCode {
    match client::download_group(uri, group_id, dir).await {
        Ok(path) => {
            println!("saved {}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn fail(e: &ClientError) -> ExitCode {
    eprintln!("error: {e}");
    ExitCode::FAILURE
}
