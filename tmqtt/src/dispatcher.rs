//! Turns decoded packets into broker actions.
//!
//! Frames are decoded on the connection's worker. Acknowledgements and PUBLISH go to the
//! inflight engine, everything that touches broker-wide state becomes an [`Event`] and is
//! handled one at a time, in order, by [`process_event`].

use std::sync::Arc;

use itertools::Itertools;

use tmqtt_codec::DecodeError;

use crate::connection::Connection;
use crate::context::BrokerContext;
use crate::error::MqttError;
use crate::inflight::{Flow, InflightEntry};
use crate::subscription::Subscription;
use crate::topic::Topic;
use crate::types::{
    ClientId, Connect, ConnectAck, ConnectAckReason, Packet, PacketId, Publish, QoS, SubscribeReturnCode,
    TopicFilter, MQTT_LEVEL_31, MQTT_LEVEL_311,
};
use crate::{router, session, Result};

#[derive(Debug)]
pub enum Event {
    Connect(Box<Connect>),
    Subscribe { packet_id: PacketId, topic_filters: Vec<(TopicFilter, QoS)> },
    Unsubscribe { packet_id: PacketId, topic_filters: Vec<TopicFilter> },
    Disconnect,
    /// PUBLISH received from the client, ready to be routed
    Deliver(Publish),
    Published { packet_id: PacketId, published: bool },
    Subscribed { packet_id: PacketId },
    Unsubscribed { packet_id: PacketId },
}

/// Decodes and handles every complete frame buffered on `conn`.
///
/// Decoding pauses after CONNECT until the connection has been admitted, so nothing the
/// client pipelined behind it can be answered before CONNACK.
pub(crate) fn process_frames(conn: &Arc<Connection>) -> Result<()> {
    if !conn.is_running() || conn.is_closing() {
        return Ok(());
    }
    loop {
        if conn.connect_received() && !conn.is_connected() {
            return Ok(());
        }
        let packet = match conn.next_packet() {
            Ok(Some(packet)) => packet,
            Ok(None) => return Ok(()),
            Err(e) => {
                if !conn.connect_received() {
                    refuse_malformed_connect(conn, &e);
                }
                return Err(e);
            }
        };
        conn.touch();
        handle_packet(conn, packet)?;
    }
}

fn refuse_malformed_connect(conn: &Connection, e: &MqttError) {
    let return_code = match e {
        MqttError::Decode(DecodeError::UnsupportedProtocolLevel) => ConnectAckReason::UnacceptableProtocolVersion,
        MqttError::Decode(DecodeError::InvalidClientId) => ConnectAckReason::IdentifierRejected,
        _ => return,
    };
    if let Err(e) = conn.send(Packet::ConnectAck(ConnectAck { return_code, session_present: false })) {
        log::debug!("{:?} send CONNACK failed, {}", conn, e);
    }
}

fn handle_packet(conn: &Arc<Connection>, packet: Packet) -> Result<()> {
    match packet {
        Packet::Connect(connect) => {
            if conn.connect_received() {
                return Err(MqttError::Protocol("second CONNECT"));
            }
            conn.set_connect_received();
            conn.push_event(Event::Connect(connect));
        }
        _ if !conn.is_connected() => return Err(MqttError::Protocol("packet before CONNECT")),
        Packet::Publish(publish) => {
            Topic::name(&publish.topic).map_err(|_| MqttError::Protocol("invalid topic name"))?;
            conn.enqueue_inflight(InflightEntry::from_publish(publish, Flow::ToAcknowledge));
        }
        Packet::PublishAck { .. }
        | Packet::PublishReceived { .. }
        | Packet::PublishRelease { .. }
        | Packet::PublishComplete { .. } => conn.enqueue_ack(packet)?,
        Packet::Subscribe { packet_id, topic_filters } => {
            conn.push_event(Event::Subscribe { packet_id, topic_filters });
        }
        Packet::Unsubscribe { packet_id, topic_filters } => {
            conn.push_event(Event::Unsubscribe { packet_id, topic_filters });
        }
        Packet::PingRequest => conn.send(Packet::PingResponse)?,
        Packet::Disconnect => conn.push_event(Event::Disconnect),
        other => return Err(MqttError::UnexpectedPacket(other.name())),
    }
    Ok(())
}

/// Handles one internal event of `conn`. With none left, finishes a requested close.
pub(crate) async fn process_event(ctx: &BrokerContext, conn: &Arc<Connection>) -> Result<()> {
    let Some(event) = conn.pop_event() else {
        if conn.is_closing() {
            close_connection(ctx, conn);
        }
        return Ok(());
    };
    if conn.is_closed() {
        return Ok(());
    }

    match event {
        Event::Connect(connect) => on_connect(ctx, conn, *connect).await?,
        Event::Subscribe { packet_id, topic_filters } => on_subscribe(ctx, conn, packet_id, topic_filters).await?,
        Event::Unsubscribe { packet_id, topic_filters } => {
            let client_id = conn.client_id();
            for topic_filter in topic_filters.iter() {
                router::unsubscribe(ctx, conn, &client_id, topic_filter);
            }
            conn.send(Packet::UnsubscribeAck { packet_id })?;
        }
        Event::Disconnect => {
            //a clean disconnect discards the will
            conn.take_will();
            conn.request_close();
        }
        Event::Deliver(publish) => {
            if ctx.security.authorize_publish(conn, &publish.topic).await {
                ctx.stats.publishes.inc();
                router::publish(ctx, Publish { dup: false, ..publish })?;
            } else {
                log::info!("{:?} publish to {} denied", conn, publish.topic);
            }
        }
        Event::Published { packet_id, published } => {
            if published {
                ctx.stats.ackeds.inc();
            } else {
                ctx.stats.publish_failures.inc();
                log::info!("{:?} delivery failed, packet_id: {}", conn, packet_id);
            }
        }
        Event::Subscribed { packet_id } => {
            ctx.stats.subscribes.inc();
            log::debug!("{:?} subscribed, packet_id: {}", conn, packet_id);
        }
        Event::Unsubscribed { packet_id } => {
            ctx.stats.unsubscribes.inc();
            log::debug!("{:?} unsubscribed, packet_id: {}", conn, packet_id);
        }
    }
    Ok(())
}

async fn verify(ctx: &BrokerContext, connect: &Connect) -> ConnectAckReason {
    let level = connect.protocol.level();
    if level != MQTT_LEVEL_31 && level != MQTT_LEVEL_311 {
        return ConnectAckReason::UnacceptableProtocolVersion;
    }
    if connect.protocol.is_v31() && connect.client_id.len() > ctx.settings.max_clientid_len_v31 {
        return ConnectAckReason::IdentifierRejected;
    }
    if connect.client_id.is_empty() && !connect.clean_session {
        return ConnectAckReason::IdentifierRejected;
    }
    if !ctx.security.authenticate(connect.username.as_deref(), connect.password.as_deref()).await {
        return ConnectAckReason::BadUserNameOrPassword;
    }
    ConnectAckReason::ConnectionAccepted
}

async fn on_connect(ctx: &BrokerContext, conn: &Arc<Connection>, connect: Connect) -> Result<()> {
    let return_code = verify(ctx, &connect).await;
    if return_code != ConnectAckReason::ConnectionAccepted {
        log::info!("{:?} connection refused, {}", conn, return_code.reason());
        conn.send(Packet::ConnectAck(ConnectAck { return_code, session_present: false }))?;
        conn.request_close();
        return Ok(());
    }

    let Connect { protocol, clean_session, keep_alive, last_will, client_id, username, .. } = connect;
    let client_id = if client_id.is_empty() {
        ClientId::from(uuid::Uuid::new_v4().simple().to_string())
    } else {
        client_id
    };

    {
        let mut state = conn.state.write();
        state.client_id = client_id.clone();
        state.protocol = protocol;
        state.clean_session = clean_session;
        state.keep_alive = keep_alive;
        state.username = username;
        state.will = last_will;
    }

    //single session per client id, the old owner goes first so its session is saved
    if let Some(old) = ctx.registry.get(&client_id) {
        log::info!("{:?} taken over by {:?}", old, conn);
        close_connection(ctx, &old);
    }
    if let Some(displaced) = ctx.registry.register(client_id.clone(), conn.clone()) {
        if !Arc::ptr_eq(&displaced, conn) {
            close_connection(ctx, &displaced);
        }
    }
    conn.set_connected(true);

    if clean_session {
        ctx.sessions.clear(&client_id);
        conn.send(Packet::ConnectAck(ConnectAck { return_code, session_present: false }))?;
    } else {
        conn.attach_session();
        let stored = ctx.sessions.get(&client_id);
        let session_present = stored.is_some() && !protocol.is_v31();
        conn.send(Packet::ConnectAck(ConnectAck { return_code, session_present }))?;
        if let Some(stored) = stored {
            session::resume(ctx, conn, &stored)?;
        }
    }
    log::debug!("{:?} connected, {}, clean_session: {}, keep_alive: {}", conn, protocol, clean_session, keep_alive);

    //frames pipelined behind CONNECT
    conn.worker.signal_frames(conn.clone());
    Ok(())
}

async fn on_subscribe(
    ctx: &BrokerContext,
    conn: &Arc<Connection>,
    packet_id: PacketId,
    topic_filters: Vec<(TopicFilter, QoS)>,
) -> Result<()> {
    let client_id = conn.client_id();
    //v3.1 has no failure return code, refused filters echo the requested QoS
    let v31 = conn.protocol().is_v31();
    let refused = |qos| if v31 { SubscribeReturnCode::Success(qos) } else { SubscribeReturnCode::Failure };

    let mut status = Vec::with_capacity(topic_filters.len());
    let mut granted = Vec::new();
    for (topic_filter, qos) in topic_filters {
        if !ctx.security.authorize_subscribe(conn, &topic_filter).await {
            log::info!("{:?} subscribe to {} denied", conn, topic_filter);
            status.push(refused(qos));
            continue;
        }
        match Subscription::new(client_id.clone(), topic_filter, qos, Some(conn)) {
            Ok(sub) => {
                router::subscribe(ctx, conn, sub.clone())?;
                status.push(SubscribeReturnCode::Success(qos));
                granted.push(sub);
            }
            Err(e) => {
                log::debug!("{:?} invalid topic filter, {}", conn, e);
                status.push(refused(qos));
            }
        }
    }
    conn.send(Packet::SubscribeAck { packet_id, status })?;
    log::debug!(
        "{:?} granted [{}]",
        conn,
        granted.iter().map(|s| format!("{}:{:?}", s.topic_filter, s.qos)).join(", ")
    );

    for sub in granted.iter() {
        router::deliver_retained(ctx, conn, sub)?;
    }
    Ok(())
}

/// Tears a connection down, once. The registered owner of a client id also hands its
/// state over: subscriptions are dropped and the session saved before the will goes out.
pub(crate) fn close_connection(ctx: &BrokerContext, conn: &Arc<Connection>) {
    if !conn.mark_closed() {
        return;
    }
    let was_connected = conn.is_connected();
    conn.set_stopped();
    conn.abort_retry();

    if was_connected && ctx.registry.remove_if(conn) {
        let (client_id, clean_session, filters) = {
            let state = conn.state.read();
            (state.client_id.clone(), state.clean_session, state.subscriptions.keys().cloned().collect::<Vec<_>>())
        };
        let subscriptions = conn.subscriptions();
        ctx.subscriptions.unsubscribe_all(&client_id, conn, filters.iter());

        if !clean_session && (!subscriptions.is_empty() || ctx.sessions.get(&client_id).is_some()) {
            let inflights = conn.client_session().map(|s| s.entries()).unwrap_or_default();
            ctx.sessions.save(client_id, subscriptions, inflights);
        }

        if let Some(will) = conn.take_will() {
            let publish = Publish {
                dup: false,
                retain: will.retain,
                qos: will.qos,
                topic: will.topic,
                packet_id: None,
                payload: will.message,
            };
            if let Err(e) = router::publish(ctx, publish) {
                log::warn!("{:?} publish will failed, {}", conn, e);
            }
        }
    }

    conn.close_transport();
    conn.worker.connections.dec();
    ctx.connections.remove(&conn.id);
    ctx.stats.connections.dec();
    log::debug!("{:?} closed", conn);
}
