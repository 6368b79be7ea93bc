//! Transport Factory
//!
//! Creates the transport matching a `TransportConfig`.

use super::{
    config::{TransportConfig, TransportType},
    pipe::NamedPipeTransport,
    tcp::TcpTransport,
    traits::Transport,
};

/// Create a transport based on configuration
///
/// # Example
///
/// ```ignore
/// use bridge_core::transport::{create_transport, TransportConfig};
///
/// let config = TransportConfig::for_peer("depot42", true)?;
/// let stream = create_transport(&config).open().await?;
/// ```
pub fn create_transport(config: &TransportConfig) -> Box<dyn Transport> {
    match &config.transport {
        TransportType::NamedPipe { name } => Box::new(
            NamedPipeTransport::new(name.clone(), config.connect_timeout())
                .with_pipe_dir(config.pipe_dir.clone()),
        ),
        TransportType::Tcp { port } => {
            Box::new(TcpTransport::new(*port, config.connect_timeout()))
        }
    }
}
