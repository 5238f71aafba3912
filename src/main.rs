//! This program builds reproducibility capsules around the OpenDC simulator. Which routine is
//! chosen by passing different command line arguments; each routine takes extra arguments.

fn run() -> Result<(), failure::Error> {
    let matches = clap::App::new("capsule")
        .about(
            "This program generates topology and experiment descriptors for the OpenDC simulator, \
             runs them, checks them, and packs them into a reproducibility capsule.",
        )
        .subcommand(capsule::gen_topology::cli_options())
        .subcommand(capsule::gen_experiment::cli_options())
        .subcommand(capsule::validate::cli_options())
        .subcommand(capsule::simulator::cli_options())
        .subcommand(capsule::capsule::cli_options())
        .subcommand(capsule::settings::cli_options())
        .setting(clap::AppSettings::SubcommandRequiredElseHelp)
        .setting(clap::AppSettings::DisableVersion)
        .get_matches();

    match matches.subcommand() {
        ("topologies", Some(sub_m)) => capsule::gen_topology::run(sub_m),
        ("experiments", Some(sub_m)) => capsule::gen_experiment::run(sub_m),

        ("validate", Some(sub_m)) => capsule::validate::run(sub_m),
        ("run", Some(sub_m)) => capsule::simulator::run(sub_m),
        ("bundle", Some(sub_m)) => capsule::capsule::run(sub_m),

        ("settings", Some(sub_m)) => capsule::settings::run(sub_m),

        _ => {
            unreachable!();
        }
    }
}

fn main() {
    use console::style;

    // Log at `info` unless RUST_LOG says otherwise.
    let mut builder = env_logger::Builder::from_default_env();
    if std::env::var_os("RUST_LOG").is_none() {
        builder.filter_level(log::LevelFilter::Info);
    }
    builder.init();

    // If an error occurred, try to print something helpful.
    if let Err(err) = run() {
        const MESSAGE: &str = r#"== ERROR ==================================================================================
`capsule` encountered an error. The log above may offer clues. Setting the RUST_LOG=debug
environment variable also logs the exact simulator and tar command lines.
"#;

        println!("{}", style(MESSAGE).red().bold());

        // Errors with a name of their own
        if let Some(err) = err.downcast_ref::<capsule::error::CapsuleError>() {
            match err {
                capsule::error::CapsuleError::MissingRunner { .. } => println!(
                    "The simulator distribution is expected under OpenDCExperimentRunner/ in the \
                     workspace root."
                ),
                capsule::error::CapsuleError::TemplateLoad { .. } => {
                    println!("Templates are looked up under templates/ in the workspace root.")
                }
                _ => {}
            }
        }

        // Print error and backtrace
        println!(
            "`capsule` encountered the following error:\n{}\n{}",
            err.as_fail(),
            err.backtrace(),
        );

        std::process::exit(101);
    }
}
