//! kam - keep-alive monitor
//!
//! Runs in the foreground until interrupted; supervise it with systemd or
//! a similar service manager.

use clap::{Arg, ArgAction, Command};
use kam::checks::configured_checks;
use kam::{
    CheckContext, Config, DEFAULT_CONFIG_PATH, HotplugWatcher, Monitor, PollManager,
    SysfsEnumerator, build_checks,
};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::mpsc;

fn cli() -> Command {
    Command::new("kam")
        .version(kam::VERSION)
        .about("Runs an idle command once the host stops showing activity")
        .long_about(
            "kam watches keyboard and mouse input, CPU load, network traffic, \
             connections, processes and kick files, and runs the configured \
             idle command once none of them has shown activity for idle_time minutes.",
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .help("Configuration file")
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::new("check")
                .long("check")
                .action(ArgAction::SetTrue)
                .help(
                    "Validate the configuration, print the resolved settings and exit \
                     without opening any device",
                ),
        )
}

fn init_logging(config: &Config) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(path) = &config.general.log_file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("kam: cannot open log file {}: {}", path.display(), e),
        }
    }
    builder.init();
}

fn settings_report(config: &Config) -> String {
    let mut lines = vec![
        format!("period:        {}s", config.general.period),
        format!("idle time:     {}min", config.general.idle_time),
        format!("idle command:  {}", config.idle_command().unwrap_or("(none)")),
        format!("exit on idle:  {}", config.general.exit_after_idle_command),
        format!("hotplug:       {}", config.general.hotplug_command.join(" ")),
    ];
    for (name, enabled) in configured_checks(config) {
        lines.push(format!(
            "check {:<12} {}",
            name,
            if enabled { "enabled" } else { "disabled" }
        ));
    }
    lines.join("\n")
}

fn run(config: &Config) -> kam::Result<()> {
    let poll = PollManager::new()?;
    let mut ctx = CheckContext::new(poll.clone(), Arc::new(SysfsEnumerator::default()));

    let hotplug = HotplugWatcher::new(poll.clone(), config.general.hotplug_command.clone());
    match hotplug.start() {
        Ok(()) => ctx = ctx.with_hotplug(hotplug.clone()),
        Err(e) => log::warn!("{}; input devices will not be re-scanned", e),
    }

    let mut monitor = Monitor::from_config(build_checks(config, &ctx), config)?;

    let (stop, shutdown) = mpsc::channel();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = stop.send(());
    }) {
        log::warn!("cannot install signal handler: {}", e);
    }

    monitor.run(&shutdown)?;

    if hotplug.is_running() {
        hotplug.stop()?;
    }
    Ok(())
}

fn main() -> ExitCode {
    let matches = cli().get_matches();
    let config_path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("kam: {}: {}", config_path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    if matches.get_flag("check") {
        println!("{}", settings_report(&config));
        return ExitCode::SUCCESS;
    }

    init_logging(&config);
    log::info!("kam {} using {}", kam::VERSION, config_path.display());

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_constant() {
        assert!(!kam::VERSION.is_empty());
    }

    #[test]
    fn test_cli_definition() {
        cli().debug_assert();

        let matches = cli().try_get_matches_from(["kam", "--check"]).unwrap();
        assert!(matches.get_flag("check"));
        assert_eq!(
            matches.get_one::<String>("config").map(String::as_str),
            Some(DEFAULT_CONFIG_PATH)
        );

        let matches = cli()
            .try_get_matches_from(["kam", "-c", "/tmp/kam.toml"])
            .unwrap();
        assert_eq!(
            matches.get_one::<String>("config").map(String::as_str),
            Some("/tmp/kam.toml")
        );
    }

    #[test]
    fn test_settings_report() {
        let config = Config::parse(
            "[general]\nperiod = 5\nidle_time = 30\nidle_command = \"poweroff\"\n\
             [keyboard]\ndevices = \"event9\"\n",
        )
        .unwrap();
        let report = settings_report(&config);
        assert!(report.contains("period:        5s"));
        assert!(report.contains("idle command:  poweroff"));
        // Reported from the configuration even though event9 is never opened.
        assert!(report.contains(&format!("check {:<12} enabled", "keyboard")));
        assert!(report.contains(&format!("check {:<12} disabled", "mouse")));
        assert!(report.lines().last().is_some_and(|l| l.starts_with("check kick")));
    }
}
