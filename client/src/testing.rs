//! In-memory server peer used by unit tests

use crate::connection::Connection;
use shared::{decode, encode, Instruction, Message, FRAME_LEN};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Returns an authenticated connection and the server end of its transport
///
/// The authentication frame has already been consumed from the server end.
pub(crate) async fn connected_pair() -> (Connection, DuplexStream) {
    let (client_end, mut server_end) = tokio::io::duplex(64 * 1024);

    let success = encode(&Message::new(Instruction::Success)).unwrap();
    server_end.write_all(&success).await.unwrap();
    server_end.write_all(&success).await.unwrap();

    let mut connection = Connection::new();
    connection.attach(client_end, None).await.unwrap();

    let mut auth = [0u8; FRAME_LEN];
    server_end.read_exact(&mut auth).await.unwrap();
    assert_eq!(decode(&auth).unwrap().instruction, Instruction::Authenticate);

    (connection, server_end)
}

/// Reads every frame until the client side closes
pub(crate) async fn drain_frames(server_end: &mut DuplexStream) -> Vec<Message> {
    let mut bytes = Vec::new();
    server_end.read_to_end(&mut bytes).await.unwrap();
    assert_eq!(bytes.len() % FRAME_LEN, 0, "partial frame on the wire");

    bytes
        .chunks_exact(FRAME_LEN)
        .map(|chunk| {
            let mut frame = [0u8; FRAME_LEN];
            frame.copy_from_slice(chunk);
            decode(&frame).unwrap()
        })
        .collect()
}
