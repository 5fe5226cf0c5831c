use std::path::PathBuf;
use std::process::ExitCode;

use clap::{arg, command, crate_name, value_parser, ArgMatches, Command};

mod cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = build_cli().get_matches();

    match cli.subcommand() {
        Some((cli::VERSION_SUBCOMMAND, _)) => {
            cli::version::run();
            ExitCode::SUCCESS
        }
        Some((cli::BUGREPORT_SUBCOMMAND, _)) => {
            cli::bugreport::run();
            ExitCode::SUCCESS
        }
        Some((cli::SERVER_SUBCOMMAND, matches)) => cli::server::run(matches).await,
        Some((cli::UPLOAD_SUBCOMMAND, matches)) => {
            let files: Vec<PathBuf> = matches
                .get_many::<PathBuf>("files")
                .map(|f| f.cloned().collect())
                .unwrap_or_default();
            cli::transfer::upload(uri(matches), &files).await
        }
        Some((cli::INFO_SUBCOMMAND, matches)) => {
            cli::transfer::info(uri(matches), group(matches)).await
        }
        Some((cli::DOWNLOAD_SUBCOMMAND, matches)) => {
            let dir = matches
                .get_one::<PathBuf>("output")
                .cloned()
                .unwrap_or_else(|| PathBuf::from("."));
            cli::transfer::download(uri(matches), group(matches), &dir).await
        }
        _ => ExitCode::FAILURE,
    }
}

fn uri(matches: &ArgMatches) -> &str {
    matches
        .get_one::<String>("uri")
        .map_or("http://localhost:5000", String::as_str)
}

fn group(matches: &ArgMatches) -> &str {
    matches
        .get_one::<String>("group")
        .map_or("", String::as_str)
}

fn build_cli() -> Command {
    command!(crate_name!())
        .version(clap::crate_version!())
        .about(clap::crate_description!())
        .subcommand(Command::new(cli::VERSION_SUBCOMMAND).about(cli::VERSION_DESCRIPTION))
        .subcommand(Command::new(cli::BUGREPORT_SUBCOMMAND).about(cli::BUGREPORT_DESCRIPTION))
        .subcommand(
            Command::new(cli::SERVER_SUBCOMMAND)
                .about(cli::SERVER_DESCRIPTION)
                .arg(arg!(-d --"data-dir" <DIR>).help("Directory for uploads and temporary archives"))
                .arg(arg!(-p --port <PORT>).help("Port to listen on"))
                .arg(arg!(--"max-file-size" <BYTES>).help("Largest file accepted"))
                .arg(arg!(--"max-files" <COUNT>).help("Most files accepted in one upload"))
                .arg(arg!(--"file-retention" <SECONDS>).help("How long uploaded files are kept"))
                .arg(
                    arg!(--"scratch-retention" <SECONDS>)
                        .help("How long abandoned temporary archives are kept"),
                )
                .arg(arg!(--"sweep-interval" <SECONDS>).help("Time between cleanup runs"))
                .arg(arg!(--"compression-level" <LEVEL>).help("Deflate level of group archives")),
        )
        .subcommand(
            Command::new(cli::UPLOAD_SUBCOMMAND)
                .about(cli::UPLOAD_DESCRIPTION)
                .arg(uri_arg())
                .arg(
                    arg!(<files> ...)
                        .help("Files to upload")
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new(cli::INFO_SUBCOMMAND)
                .about(cli::INFO_DESCRIPTION)
                .arg(uri_arg())
                .arg(group_arg()),
        )
        .subcommand(
            Command::new(cli::DOWNLOAD_SUBCOMMAND)
                .about(cli::DOWNLOAD_DESCRIPTION)
                .arg(uri_arg())
                .arg(group_arg())
                .arg(
                    arg!(-o --output <DIR>)
                        .help("Directory to save into, current one by default")
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .arg_required_else_help(true)
        .disable_version_flag(true)
}

fn uri_arg() -> clap::Arg {
    arg!(-u --uri <URI>).required(true).help("Server URI")
}

fn group_arg() -> clap::Arg {
    arg!(-g --group <GROUP>).required(true).help("Group id")
}
