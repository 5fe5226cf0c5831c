pub mod bugreport;
pub mod server;
pub mod transfer;
pub mod version;

pub const SERVER_SUBCOMMAND: &str = "server";
pub const SERVER_DESCRIPTION: &str = "Run the server";

pub const VERSION_SUBCOMMAND: &str = "version";
pub const VERSION_DESCRIPTION: &str = "Display the version and build information";

pub const BUGREPORT_SUBCOMMAND: &str = "bugreport";
pub const BUGREPORT_DESCRIPTION: &str = "Collect information about the system and the environment for bug reports";

pub const UPLOAD_SUBCOMMAND: &str = "upload";
pub const UPLOAD_DESCRIPTION: &str = "Upload files as one group";

pub const INFO_SUBCOMMAND: &str = "info";
pub const INFO_DESCRIPTION: &str = "Show files of a group";

pub const DOWNLOAD_SUBCOMMAND: &str = "download";
pub const DOWNLOAD_DESCRIPTION: &str = "Download a group: the file itself or a zip archive of all files";
