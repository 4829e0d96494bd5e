//! The PWM endpoint: `change_duty`, `change_frequency` and `stop` over
//! JSON-RPC.

use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tgut_core::devices::pwm::{validate_duty, validate_frequency_khz, PwmChannel, DEFAULT_DUTY};
use tgut_core::devices::Guarded;
use tgut_core::rpc::{arg_i64, ProcedureTable, RpcServer, RpcServerHandle};
use tgut_core::Result;
use tokio::sync::Notify;
use tracing::info;

type SharedChannel = Arc<Guarded<Box<dyn PwmChannel>>>;

/// A PWM channel exposed to the control panel.
pub struct PwmService {
    channel: SharedChannel,
    stopped: Arc<Notify>,
}

impl PwmService {
    /// Enable `channel` at the default duty.
    pub fn new(mut channel: Box<dyn PwmChannel>) -> Result<Self> {
        channel.start(DEFAULT_DUTY)?;
        Ok(Self {
            channel: Arc::new(Guarded::new(channel)),
            stopped: Arc::new(Notify::new()),
        })
    }

    pub fn duty(&self) -> u8 {
        self.channel.with_device(|channel| channel.duty())
    }

    pub fn frequency(&self) -> u32 {
        self.channel.with_device(|channel| channel.frequency())
    }

    pub fn is_enabled(&self) -> bool {
        self.channel.with_device(|channel| channel.is_enabled())
    }

    /// Disable the output.
    pub fn stop_output(&self) -> Result<()> {
        self.channel.with_device(|channel| channel.stop())
    }

    fn procedures(&self) -> ProcedureTable {
        let mut table = ProcedureTable::new();

        let channel = Arc::clone(&self.channel);
        table.insert("change_duty", move |args: Vec<Value>| {
            let channel = Arc::clone(&channel);
            async move {
                let duty = validate_duty(arg_i64(&args, 0, "duty")?)?;
                info!("Changing duty cycle to {}%", duty);
                channel.with_device(|channel| channel.set_duty(duty))?;
                Ok(Value::Null)
            }
        });

        let channel = Arc::clone(&self.channel);
        table.insert("change_frequency", move |args: Vec<Value>| {
            let channel = Arc::clone(&channel);
            async move {
                let hz = validate_frequency_khz(arg_i64(&args, 0, "freq")?)?;
                info!("Changing frequency to {} Hz", hz);
                channel.with_device(|channel| channel.set_frequency(hz))?;
                Ok(Value::Null)
            }
        });

        let channel = Arc::clone(&self.channel);
        let stopped = Arc::clone(&self.stopped);
        table.insert("stop", move |_args: Vec<Value>| {
            let channel = Arc::clone(&channel);
            let stopped = Arc::clone(&stopped);
            async move {
                channel.with_device(|channel| channel.stop())?;
                stopped.notify_one();
                Ok(Value::Null)
            }
        });

        table
    }

    /// Bind `addr` and serve the procedures.
    pub async fn start(&self, addr: SocketAddr, log_requests: bool) -> Result<RpcServerHandle> {
        RpcServer::start(addr, self.procedures(), log_requests).await
    }

    /// Resolves once a peer has called `stop`.
    pub async fn stopped(&self) {
        self.stopped.notified().await;
    }
}
