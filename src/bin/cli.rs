//! Ncpboot command line interface.

use std::{
    fs::File,
    process,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use clap::{
    crate_authors, crate_description, crate_name, crate_version, value_t, App, AppSettings::*, Arg,
    ArgMatches,
};
use console::{style, Term};
use dialoguer::{theme::ColorfulTheme, Confirm, Select};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, trace, LevelFilter};
use serialport::{DataBits, FlowControl, Parity, StopBits};
use simplelog::*;

use ncpboot::{
    self as nb,
    ota::{ImageStorage, OtaFile, UPGRADE_IMAGE_TAG},
    Phase, Transfer, TransferError, TransferReport,
};

/// Everything went through and the device runs the new image.
const EXIT_SUCCESS: i32 = 0;
/// Nothing was sent to the device; it is safe to try again.
const EXIT_BEFORE_DATA: i32 = 1;
/// The transfer failed part way; the device needs a complete update.
const EXIT_DATA_SENT: i32 = 2;
/// The image went through but the device did not accept the run command.
const EXIT_NOT_REBOOTED: i32 = 3;

fn main() {
    println!("[NB] ncpboot v{}", crate_version!());

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            println!("🛑 received Ctrl+C, stopping before the next byte exchange...");
            cancel.store(true, Ordering::SeqCst);
        }) {
            println!("{}: failed to install the Ctrl+C handler: {}", style("warning").yellow(), e);
        }
    }

    let matches = App::new(crate_name!())
        .version(format!("v{}", crate_version!()).as_str())
        .author(crate_authors!())
        .about(crate_description!())
        .long_about(
            "\n\
            Ncpboot reflashes the network co-processor (NCP) of a Zigbee \
            coordinator through its standalone serial boot-loader.\n\
            \n\
            It extracts a tagged sub-image (by default the upgrade image, tag \
            0x0000) from an OTA container file, then: \n\
               \t* wakes the boot-loader up and waits for its menu prompt \n\
               \t* selects the upload command and waits for the receiver \n\
               \t* sends the image with Xmodem-CRC, 128 bytes per block \n\
               \t* selects the run command to start the new firmware \n\
            \n\
            The NCP must already be in boot-loader mode. The process exits \
            with 0 on success, 1 when nothing was sent to the device, 2 when \
            the transfer failed part way and 3 when the image went through \
            but the device could not be rebooted.\
        ",
        )
        .max_term_width(80)
        .setting(ColoredHelp)
        .setting(NextLineHelp)
        .arg(
            Arg::with_name("DEVICE_TTY")
                .help("the serial tty device to use")
                .long_help(
                    "the serial tty device the NCP is attached to; when not \
                     set, `ncpboot` presents the list of available ports to \
                     select from.",
                )
                .short("-t")
                .long("--tty")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("BAUD_RATE")
                .help("serial port baud rate")
                .long_help("serial baud rate")
                .short("-b")
                .long("--baud-rate")
                .takes_value(true)
                .default_value("115200")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("DATA_BITS")
                .help("number of bits per character")
                .short("-d")
                .long("--data-bits")
                .takes_value(true)
                .possible_values(&["5", "6", "7", "8"])
                .default_value("8")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("STOP_BITS")
                .help("number of stop bits per byte")
                .short("-s")
                .long("--stop-bits")
                .takes_value(true)
                .possible_values(&["1", "2"])
                .default_value("1")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("PARITY")
                .help("parity checking protocol")
                .short("-p")
                .long("--parity")
                .takes_value(true)
                .possible_values(&["none", "odd", "even"])
                .default_value("none")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("FLOW_CONTROL")
                .help("flow control mode")
                .short("-f")
                .long("--flow-control")
                .takes_value(true)
                .possible_values(&["none", "soft", "hard"])
                .default_value("none")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("TAG")
                .help("tag of the sub-image to send")
                .long_help(
                    "tag of the sub-image to send, in decimal or in hex with \
                     a `0x` prefix; defaults to the upgrade image tag.",
                )
                .long("--tag")
                .takes_value(true)
                .default_value("0x0000")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("CHUNK_SIZE")
                .help("bytes read from the OTA file at a time")
                .long("--chunk-size")
                .takes_value(true)
                .default_value("256")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("YES")
                .help("do not ask for confirmation before flashing")
                .short("-y")
                .long("--yes"),
        )
        .arg(
            Arg::with_name("OTA_FILE")
                .help("path to the OTA file holding the NCP image")
                .required(true)
                .index(1),
        )
        .arg(Arg::with_name("v").short("v").multiple(true).help(
            "Sets the logging level of verbosity, repeat several times for \
                higher verbosity",
        ))
        .get_matches();

    // Vary the output based on how many times the user used the "verbose" flag
    // (i.e. 'ncpboot -v -v -v' or 'ncpboot -vvv' vs 'ncpboot -v'
    let log_level = match matches.occurrences_of("v") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    if TermLogger::init(log_level, Config::default(), TerminalMode::Mixed).is_err() {
        println!("{}: logging is not available", style("warning").yellow());
    }

    trace!("{:#?}", matches);

    // Arguments with default values ===========================================

    // Values with a default or a list of possible values are always present,
    // so only the numeric conversions can fail.

    let baud_rate = numeric_or_exit::<u32>(&matches, "BAUD_RATE", "baud-rate");
    let chunk_size = numeric_or_exit::<u32>(&matches, "CHUNK_SIZE", "chunk-size");

    let tag_id = matches
        .value_of("TAG")
        .and_then(parse_tag)
        .unwrap_or_else(|| {
            invalid_value(&matches, "TAG", "tag", "a 16-bit decimal or 0x-prefixed hex value")
        });

    let data_bits = match matches.value_of("DATA_BITS") {
        Some("5") => DataBits::Five,
        Some("6") => DataBits::Six,
        Some("7") => DataBits::Seven,
        _ => DataBits::Eight,
    };

    let stop_bits = match matches.value_of("STOP_BITS") {
        Some("2") => StopBits::Two,
        _ => StopBits::One,
    };

    let parity = match matches.value_of("PARITY") {
        Some("even") => Parity::Even,
        Some("odd") => Parity::Odd,
        _ => Parity::None,
    };

    let flow_control = match matches.value_of("FLOW_CONTROL") {
        Some("soft") => FlowControl::Software,
        Some("hard") => FlowControl::Hardware,
        _ => FlowControl::None,
    };

    // END - Arguments with default values =====================================

    let mut settings = nb::SettingsBuilder::default()
        .baud_rate(baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .flow_control(flow_control)
        .chunk_size(chunk_size)
        .finalize();

    // START - Arguments with NO default values ================================

    settings.path = match matches.value_of("DEVICE_TTY") {
        Some(path) => Some(path.into()),
        None => select_port(),
    };
    let path = match &settings.path {
        Some(path) => path.clone(),
        None => {
            println!("[NB] ❌ no serial port selected");
            process::exit(EXIT_BEFORE_DATA);
        }
    };

    let ota_path = matches.value_of("OTA_FILE").unwrap_or_default();

    // END - Arguments =========================================================

    let mut ota = match File::open(ota_path)
        .map_err(nb::ota::OtaError::from)
        .and_then(OtaFile::new)
    {
        Ok(ota) => ota,
        Err(e) => {
            println!("{}: `{}`: {}", style("error").red(), style(ota_path).cyan(), e);
            process::exit(EXIT_BEFORE_DATA);
        }
    };
    let image = ota.image_id();
    let tag = match ota.locate(&image, tag_id) {
        Ok(tag) => tag,
        Err(e) => {
            println!("{}: `{}`: {}", style("error").red(), style(ota_path).cyan(), e);
            process::exit(EXIT_BEFORE_DATA);
        }
    };

    println!(
        "[NB] 📦 image {} tag {:#06x}: {} bytes",
        style(&image).green(),
        tag_id,
        tag.size
    );
    if tag_id != UPGRADE_IMAGE_TAG {
        println!(
            "[NB] {}: tag {:#06x} is not the upgrade image",
            style("warning").yellow(),
            tag_id
        );
    }

    if !matches.is_present("YES") && !confirm(&path) {
        println!("[NB] ❌ cancelled, nothing was sent");
        process::exit(EXIT_BEFORE_DATA);
    }

    let mut port = match nb::open_and_setup_port(&settings) {
        Ok(port) => port,
        Err(e) => {
            println!("{}: `{}`: {}", style("error").red(), style(&path).cyan(), e);
            process::exit(EXIT_BEFORE_DATA);
        }
    };

    // Run the transfer ========================================================

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[NB] ⏩ {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}%")
            .progress_chars("=>-"),
    );
    let mut show = |label: &str, percent: u8| {
        pb.set_message(label.to_string());
        pb.set_position(percent.into());
    };
    let mut kick = || pb.tick();

    let result = Transfer::new(&mut port, &settings)
        .on_progress(&mut show)
        .with_watchdog(&mut kick)
        .with_cancel(&cancel)
        .transfer_image(&mut ota, &image, tag_id);

    match &result {
        Ok(report) => {
            debug!("{:?}", report);
            if report.is_complete() {
                pb.finish_with_message("Done");
                println!("[NB] 👍 NCP updated, the new firmware is running");
            } else {
                pb.finish_with_message("Sent");
                println!(
                    "[NB] {}: image sent but the run command failed; power cycle the device",
                    style("warning").yellow()
                );
            }
        }
        Err(e) => {
            pb.abandon();
            error!("{:?}", e);
            println!("{}: {}", style("error").red(), e);
            match e.phase() {
                Phase::BeforeData => println!("[NB] nothing was written, the device is unchanged"),
                Phase::DataSent => println!(
                    "[NB] {}: the device may hold a partial image, run a complete update",
                    style("warning").yellow()
                ),
            }
        }
    }

    let code = exit_code(&result);
    debug!("exit code: {}", code);
    process::exit(code);
}

/// Map the outcome of a transfer to the process exit code. Invalid arguments
/// exit with [`EXIT_BEFORE_DATA`] as well.
fn exit_code(result: &Result<TransferReport, TransferError>) -> i32 {
    match result {
        Ok(report) if report.is_complete() => EXIT_SUCCESS,
        Ok(_) => EXIT_NOT_REBOOTED,
        Err(e) => match e.phase() {
            Phase::BeforeData => EXIT_BEFORE_DATA,
            Phase::DataSent => EXIT_DATA_SENT,
        },
    }
}

fn numeric_or_exit<T: std::str::FromStr>(matches: &ArgMatches, name: &str, flag: &str) -> T {
    value_t!(matches.value_of(name), T)
        .unwrap_or_else(|_| invalid_value(matches, name, flag, "a numeric value"))
}

fn invalid_value(matches: &ArgMatches, name: &str, flag: &str, expected: &str) -> ! {
    println!(
        "{}: `{}` needs to be {}",
        style("error").red(),
        style(flag).cyan(),
        expected
    );
    println!(
        "   {} `{}` is not a valid value",
        style("-->").cyan(),
        style(matches.value_of(name).unwrap_or_default()).on_red()
    );
    process::exit(EXIT_BEFORE_DATA);
}

/// Accept `0x`-prefixed hex or plain decimal.
fn parse_tag(value: &str) -> Option<u16> {
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

fn select_port() -> Option<String> {
    let ports = nb::available_ports();
    if ports.is_empty() {
        println!("[NB] ⌛ no serial port found, is the NCP connected?");
        return None;
    }

    let term = Term::buffered_stderr();
    let theme = ColorfulTheme::default();

    let mut select = Select::with_theme(&theme);
    select.with_prompt("Select the port the NCP is attached to:");
    for item in &ports {
        select.item(item);
    }

    match select.default(0).interact_on_opt(&term) {
        Ok(selection) => selection
            .and_then(|x| ports.get(x))
            .and_then(|name| name.split(':').next())
            .map(String::from),
        Err(ref e) => {
            debug!("error: {}", e.to_string());
            None
        }
    }
}

fn confirm(path: &str) -> bool {
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Flash the NCP on {}?", style(path).cyan()))
        .default(false)
        .interact()
        .unwrap_or(false)
}

#[test]
fn tags_in_hex_or_decimal() {
    assert_eq!(parse_tag("0x0000"), Some(0));
    assert_eq!(parse_tag("0X00fF"), Some(0xFF));
    assert_eq!(parse_tag("256"), Some(256));
    assert_eq!(parse_tag("0x10000"), None);
    assert_eq!(parse_tag("tag"), None);
}

#[test]
fn exit_codes_follow_the_phase() {
    use nb::{
        bootloader::HandshakeError,
        ota::{OtaError, TagRecord},
        xmodem::{SessionStats, XmodemError},
        RebootStatus,
    };

    let report = |reboot| TransferReport {
        tag: TagRecord {
            tag_id: UPGRADE_IMAGE_TAG,
            offset: 62,
            size: 1000,
        },
        stats: SessionStats::default(),
        reboot,
    };
    assert_eq!(exit_code(&Ok(report(RebootStatus::Rebooted))), 0);
    assert_eq!(
        exit_code(&Ok(report(RebootStatus::Failed(HandshakeError::PromptNotSeen(200))))),
        3
    );
    assert_eq!(
        exit_code(&Err(TransferError::Lookup(OtaError::TagNotFound(0)))),
        1
    );
    assert_eq!(
        exit_code(&Err(TransferError::Handshake(HandshakeError::Cancelled))),
        1
    );
    assert_eq!(
        exit_code(&Err(TransferError::Aborted(XmodemError::Cancelled))),
        2
    );
}
