use bugreport::{
    bugreport,
    collector::{CompileTimeInformation, EnvironmentVariables, OperatingSystem, SoftwareVersion},
    format::Markdown,
};

pub fn run() {
    bugreport!()
        .info(SoftwareVersion::default())
        .info(OperatingSystem::default())
        .info(EnvironmentVariables::list(&[
            "SHELL",
            "TERM",
            "RUST_LOG",
            "GDROP_DATA_DIR",
            "GDROP_PORT",
            "GDROP_MAX_FILE_SIZE",
            "GDROP_MAX_FILES",
            "GDROP_FILE_RETENTION_SECS",
            "GDROP_SCRATCH_RETENTION_SECS",
            "GDROP_SWEEP_INTERVAL_SECS",
            "GDROP_COMPRESSION_LEVEL",
            "GDROP_RANGE_CHUNK_SIZE",
            "GDROP_PROGRESS_CAPACITY",
        ]))
        .info(CompileTimeInformation::default())
        .print::<Markdown>();
}
