use std::io;
use std::net::IpAddr;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use rtsp_relay::relay::{QueueFullPolicy, RelayConfig};
use rtsp_relay::{Server, ServerConfig};

#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    /// Drop packets that arrive while the queue is full
    Drop,
    /// Make the receiver wait for room
    Block,
}

#[derive(Parser)]
#[command(
    name = "rtsp-relay",
    about = "RTSP relay server: one pusher per path, fanned out to any number of pullers"
)]
struct Args {
    /// Bind address (host:port)
    #[arg(long, short, default_value = "0.0.0.0:8554")]
    bind: String,

    /// SO_RCVBUF of RTSP connections in bytes (0 = OS default)
    #[arg(long, default_value_t = 0)]
    tcp_recv_buffer: usize,

    /// SO_SNDBUF of RTSP connections in bytes (0 = OS default)
    #[arg(long, default_value_t = 0)]
    tcp_send_buffer: usize,

    /// Address the pusher-facing UDP sockets bind to
    #[arg(long, default_value = "0.0.0.0")]
    udp_bind_ip: IpAddr,

    /// SO_RCVBUF of relay UDP sockets in bytes (0 = OS default)
    #[arg(long, default_value_t = 10 * 1024 * 1024)]
    udp_recv_buffer: usize,

    /// SO_SNDBUF of relay UDP sockets in bytes (0 = OS default)
    #[arg(long, default_value_t = 10 * 1024 * 1024)]
    udp_send_buffer: usize,

    /// Packets buffered per relay queue
    #[arg(long, default_value_t = 512)]
    queue_capacity: usize,

    /// What to do when a relay queue is full
    #[arg(long, value_enum, default_value = "drop")]
    queue_policy: Policy,

    /// Receive timeout of pusher sockets in milliseconds
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval_ms: u64,

    /// Longest accepted request line plus headers in bytes
    #[arg(long, default_value_t = 64 * 1024)]
    max_head_size: usize,

    /// Largest accepted request body in bytes
    #[arg(long, default_value_t = 1024 * 1024)]
    max_body_size: usize,
}

impl Args {
    fn config(&self) -> ServerConfig {
        ServerConfig {
            tcp_recv_buffer: self.tcp_recv_buffer,
            tcp_send_buffer: self.tcp_send_buffer,
            udp_bind_ip: self.udp_bind_ip,
            udp_recv_buffer: self.udp_recv_buffer,
            udp_send_buffer: self.udp_send_buffer,
            relay: RelayConfig {
                queue_capacity: self.queue_capacity,
                full_policy: match self.queue_policy {
                    Policy::Drop => QueueFullPolicy::DropNewest,
                    Policy::Block => QueueFullPolicy::Block,
                },
                poll_interval: Duration::from_millis(self.poll_interval_ms),
            },
            max_head_size: self.max_head_size,
            max_body_size: self.max_body_size,
        }
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut server = Server::with_config(&args.bind, args.config());

    if let Err(e) = server.start() {
        eprintln!("Failed to start server: {}", e);
        std::process::exit(1);
    }

    println!("RTSP relay on {} (press Enter to stop)", args.bind);
    let mut input = String::new();
    if let Err(e) = io::stdin().read_line(&mut input) {
        eprintln!("Failed to read stdin: {}", e);
    }

    server.stop();
}
