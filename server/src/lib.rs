#![deny(warnings)]

use {
    anyhow::{Context, Error, Result},
    futures::{future::BoxFuture, FutureExt},
    std::net::SocketAddr,
    tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
        task,
    },
    tracing::log,
};

/// How a test peer treats each accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Write back everything that is read.
    Echo,
    /// Read the client's message, then end the stream without replying.
    CloseAfterRead,
    /// Read the client's message, then reply with `n` bytes.
    Flood(usize),
}

pub async fn serve_echo(
    address: SocketAddr,
) -> Result<(BoxFuture<'static, Result<()>>, SocketAddr)> {
    serve(address, Behavior::Echo).await
}

pub async fn serve_close_after_read(
    address: SocketAddr,
) -> Result<(BoxFuture<'static, Result<()>>, SocketAddr)> {
    serve(address, Behavior::CloseAfterRead).await
}

pub async fn serve_flood(
    address: SocketAddr,
    count: usize,
) -> Result<(BoxFuture<'static, Result<()>>, SocketAddr)> {
    serve(address, Behavior::Flood(count)).await
}

/// Binds `address` and returns the accept loop together with the address
/// actually bound. The loop runs until dropped.
pub async fn serve(
    address: SocketAddr,
    behavior: Behavior,
) -> Result<(BoxFuture<'static, Result<()>>, SocketAddr)> {
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("Unable to listen on {address}"))?;

    let address = listener.local_addr()?;

    Ok((
        async move {
            loop {
                let (stream, peer) = listener.accept().await?;

                log::debug!("accepted {peer} on {address}");

                task::spawn(handle(stream, behavior).map(move |result| {
                    if let Err(e) = result {
                        log::warn!("error handling connection from {peer}: {e:?}");
                    }
                }));
            }
        }
        .boxed(),
        address,
    ))
}

async fn handle(mut stream: TcpStream, behavior: Behavior) -> Result<()> {
    let mut buffer = vec![0; 1024];

    match behavior {
        Behavior::Echo => loop {
            let count = stream.read(&mut buffer).await?;
            if count == 0 {
                break Ok::<_, Error>(());
            }

            stream.write_all(&buffer[..count]).await?;
        },
        Behavior::CloseAfterRead => {
            stream.read(&mut buffer).await?;
            stream.shutdown().await?;
            drain(&mut stream, &mut buffer).await
        }
        Behavior::Flood(count) => {
            stream.read(&mut buffer).await?;
            stream.write_all(&vec![b'x'; count]).await?;
            drain(&mut stream, &mut buffer).await
        }
    }
}

/// Reads until the client ends its side, so the connection is never torn
/// down with unread data.
async fn drain(stream: &mut TcpStream, buffer: &mut [u8]) -> Result<()> {
    while stream.read(buffer).await? != 0 {}
    Ok(())
}
