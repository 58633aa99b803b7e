use crate::io_error::{RESOLVE, map_io_error};
use qsocket_core::{ErrorCode, Result, SocketError};
use std::net::{SocketAddr, ToSocketAddrs};

/// 阻塞解析主机名，返回全部候选地址（保持解析器给出的顺序）。
pub(crate) fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = (host.trim(), port)
        .to_socket_addrs()
        .map_err(|err| map_io_error(RESOLVE, err).with_extra("host", host))?
        .collect();
    non_empty(addrs, host)
}

/// 异步解析，供托管流后端在运行时线程上使用。
pub(crate) async fn resolve_async(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.trim(), port))
        .await
        .map_err(|err| map_io_error(RESOLVE, err).with_extra("host", host))?
        .collect();
    non_empty(addrs, host)
}

fn non_empty(addrs: Vec<SocketAddr>, host: &str) -> Result<Vec<SocketAddr>> {
    if addrs.is_empty() {
        return Err(SocketError::new(ErrorCode::HostResolutionFailed)
            .with_message("host resolved to no addresses")
            .with_extra("host", host));
    }
    Ok(addrs)
}
