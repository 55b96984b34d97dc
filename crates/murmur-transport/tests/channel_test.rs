//! Handshake and framed-channel behavior over real sockets.

use murmur_transport::{TransportError, client_handshake, server_handshake};
use rand::rngs::OsRng;
use tokio::net::{TcpListener, TcpStream};
use x25519_dalek::{PublicKey, StaticSecret};

const FRAME: usize = 256;

fn keypair() -> ([u8; 32], [u8; 32]) {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    (secret.to_bytes(), public.to_bytes())
}

async fn pair(
    server_sk: [u8; 32],
    server_pk: [u8; 32],
    client_identity: Option<[u8; 32]>,
) -> (
    (murmur_transport::FrameReader, murmur_transport::FrameWriter),
    (murmur_transport::FrameReader, murmur_transport::FrameWriter, [u8; 32]),
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        server_handshake(stream, &server_sk, FRAME).await.unwrap()
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let client = client_handshake(stream, &server_pk, client_identity.as_ref(), FRAME)
        .await
        .unwrap();
    (client, server.await.unwrap())
}

#[tokio::test]
async fn frames_flow_both_directions() {
    let (server_sk, server_pk) = keypair();
    let (client_sk, client_pk) = keypair();

    let ((mut c_reader, mut c_writer), (mut s_reader, mut s_writer, uid)) =
        pair(server_sk, server_pk, Some(client_sk)).await;

    assert_eq!(uid, client_pk, "uid is the client's static public key");

    let frame = [7u8; FRAME];
    c_writer.write_frame(&frame).await.unwrap();
    let mut got = [0u8; FRAME];
    s_reader.read_frame(&mut got).await.unwrap();
    assert_eq!(got, frame);

    let reply = [9u8; FRAME];
    s_writer.write_frame(&reply).await.unwrap();
    c_reader.read_frame(&mut got).await.unwrap();
    assert_eq!(got, reply);
}

#[tokio::test]
async fn many_frames_keep_their_order() {
    let (server_sk, server_pk) = keypair();
    let ((_c_reader, mut c_writer), (mut s_reader, _s_writer, _uid)) =
        pair(server_sk, server_pk, None).await;

    for i in 0..50u8 {
        let frame = [i; FRAME];
        c_writer.write_frame(&frame).await.unwrap();
    }
    let mut got = [0u8; FRAME];
    for i in 0..50u8 {
        s_reader.read_frame(&mut got).await.unwrap();
        assert_eq!(got, [i; FRAME]);
    }
}

#[tokio::test]
async fn anonymous_client_gets_fresh_uid() {
    let (server_sk, server_pk) = keypair();
    let (_, (_, _, uid_a)) = pair(server_sk, server_pk, None).await;
    let (_, (_, _, uid_b)) = pair(server_sk, server_pk, None).await;
    assert_ne!(uid_a, uid_b);
}

#[tokio::test]
async fn wrong_server_key_breaks_the_channel() {
    let (server_sk, _server_pk) = keypair();
    let (_, imposter_pk) = keypair();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        // The hello was boxed to a different key; the server cannot open it.
        server_handshake(stream, &server_sk, FRAME).await
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    // The client handshake itself completes (the server reply is a bare
    // public key), but the server side must reject the hello.
    let _ = client_handshake(stream, &imposter_pk, None, FRAME).await;
    assert!(matches!(server.await.unwrap(), Err(TransportError::Crypto)));
}

#[tokio::test]
async fn wrong_size_frame_rejected() {
    let (server_sk, server_pk) = keypair();
    let ((_c_reader, mut c_writer), _server) = pair(server_sk, server_pk, None).await;

    let result = c_writer.write_frame(&[0u8; FRAME - 1]).await;
    assert!(matches!(
        result,
        Err(TransportError::WrongFrameSize { len, expected: FRAME }) if len == FRAME - 1
    ));
}

#[tokio::test]
async fn garbage_hello_rejected() {
    use tokio::io::AsyncWriteExt;

    let (server_sk, _server_pk) = keypair();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        server_handshake(stream, &server_sk, FRAME).await
    });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&[0xAB; 104]).await.unwrap();
    assert!(matches!(server.await.unwrap(), Err(TransportError::Crypto)));
}
