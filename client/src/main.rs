use clap::Parser;
use client::config::ClientConfig;
use client::error::RcError;
use client::input::{parse_command, Command, HELP};
use client::rc_client::RcClient;
use log::{error, info, warn};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long)]
    port: u16,

    /// Server password, empty for none
    #[arg(short = 'w', long, default_value = "")]
    password: String,

    /// Pin of the steering servo
    #[arg(short, long, default_value = "0")]
    steering_pin: i32,

    /// Pin of the throttle servo
    #[arg(short, long, default_value = "1")]
    throttle_pin: i32,

    /// Socket connect timeout in milliseconds, 0 waits indefinitely
    #[arg(long, default_value = "5000")]
    connect_timeout_ms: u64,

    /// Idle time before a keep-alive is sent, in milliseconds
    #[arg(short, long, default_value = "200")]
    keep_alive_ms: u64,

    /// Liveness timeout to request from the server, in milliseconds
    #[arg(long)]
    server_timeout_ms: Option<u64>,
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.host.clone(), self.port)
            .with_password(self.password.as_bytes())
            .with_control_pins(self.steering_pin, self.throttle_pin);

        config.connect_timeout =
            (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms));
        config.keep_alive = Duration::from_millis(self.keep_alive_ms);
        config.server_timeout = self.server_timeout_ms.map(Duration::from_millis);
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = args.client_config();

    let mut client = RcClient::new();
    if let Err(e) = client.connect(&config).await {
        error!("Could not connect to {}:{}: {}", args.host, args.port, e);
        return Err(e.into());
    }
    info!("Connected to {}:{}", args.host, args.port);

    for pin in [args.throttle_pin, args.steering_pin] {
        if let Err(e) = client.add_default_servo(pin).await {
            error!("Failed to add servo on pin {}: {}", pin, e);
            client.disconnect().await;
            return Err(e.into());
        }
    }

    println!("{}", HELP);

    run_console(&mut client, BufReader::new(tokio::io::stdin())).await;
    info!("Disconnected");
    Ok(())
}

/// Executes console lines until quit, end of input or Ctrl+C, then ends the session
async fn run_console<R>(client: &mut RcClient, input: R)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => match line {
                Ok(line) => line,
                Err(e) => {
                    error!("Failed to read console input: {}", e);
                    None
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, disconnecting...");
                None
            }
        };
        let Some(line) = line else {
            break;
        };

        let command = match parse_command(&line) {
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };

        if let Err(e) = execute(client, command).await {
            warn!("{:?} failed: {}", command, e);

            if !recover(client, e).await {
                break;
            }
        }
    }

    client.quit().await;
}

async fn execute(client: &mut RcClient, command: Command) -> Result<(), RcError> {
    match command {
        Command::Steering(value) => match client.dispatcher() {
            Some(controls) => controls.set_steering(value),
            None => warn!("Control dispatcher is not running"),
        },
        Command::Throttle(value) => match client.dispatcher() {
            Some(controls) => controls.set_throttle(value),
            None => warn!("Control dispatcher is not running"),
        },
        Command::AddServo(pin) => client.add_default_servo(pin).await?,
        Command::RemoveServo(pin) => {
            if !client.remove_servo(pin).await? {
                println!("no servo on pin {}", pin);
            }
        }
        Command::MinWidth(pin, width) => report(pin, client.set_min_width(pin, width).await?),
        Command::MaxWidth(pin, width) => report(pin, client.set_max_width(pin, width).await?),
        Command::IdleSteering(pin, value) => {
            report(pin, client.set_default_steering(pin, value).await?)
        }
        Command::Smoothing(pin, value) => report(pin, client.set_smoothing(pin, value).await?),
        Command::Rebuild => client.rebuild().await?,
        Command::Reset => client.reset().await?,
        Command::Status => print_status(client),
        Command::Help => println!("{}", HELP),
        Command::Quit => {}
    }
    Ok(())
}

/// Returns false when the session cannot continue
async fn recover(client: &mut RcClient, error: RcError) -> bool {
    if !error.is_transport() {
        return client.is_connected().await;
    }

    info!("Resynchronizing server state");
    match client.rebuild().await {
        Ok(()) => true,
        Err(e) => {
            error!("Lost connection to server: {}", e);
            false
        }
    }
}

fn report(pin: i32, servo: Option<client::servo::ServoConfig>) {
    match servo {
        Some(servo) => println!(
            "pin {}: steering {:.2}, width {:.0}-{:.0}us, idle {:.2}, smoothing {:.2}",
            pin,
            servo.steering(),
            servo.min_width(),
            servo.max_width(),
            servo.idle_steering(),
            servo.smoothing()
        ),
        None => println!("no servo on pin {}", pin),
    }
}

fn print_status(client: &RcClient) {
    let mut pins: Vec<i32> = client.servos().iter().map(|(pin, _)| pin).collect();
    pins.sort_unstable();

    println!("{} servos", pins.len());
    for pin in pins {
        report(pin, client.servo(pin));
        if let Some(servo) = client.servo(pin) {
            println!("        pulse width {:.0}us", servo.pulse_width());
        }
    }
}
