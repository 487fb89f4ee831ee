// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios driving the full client in-process.

use std::sync::Arc;
use std::time::Duration;

use seaward::node::HubId;
use seaward::policy::Policy;
use seaward::status::{ClientState, Event};
use seaward::terminal::Terminal;

use seaward_specs::{
    wait_connected_to, wait_state, FakeHarness, SpecHub, WireHarness,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

// -- 1. Cold start, happy path ------------------------------------------------

#[tokio::test]
async fn cold_start_happy_path() -> anyhow::Result<()> {
    let hub = SpecHub::spawn("DE").await?;
    let harness = WireHarness::build(&[&hub], &[]).await?;
    let mut events = harness.instance.status.subscribe();

    assert_eq!(harness.instance.status.current().state, ClientState::Disabled);

    harness.instance.start().await?;
    wait_connected_to(&harness.instance, &hub.id(), CONNECT_TIMEOUT).await?;

    let status = harness.instance.status.current();
    let connected = status.connected.as_ref().ok_or_else(|| anyhow::anyhow!("no details"))?;
    assert_eq!(connected.country, "DE");
    assert_eq!(connected.transport, "tcp");

    // Exactly one connected event.
    let mut connected_events = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, Event::Connected { .. }) {
            connected_events += 1;
        }
    }
    assert_eq!(connected_events, 1);

    harness.shutdown.cancel();
    Ok(())
}

// -- 2. Policy excludes all ---------------------------------------------------

#[tokio::test]
async fn policy_excluding_everything_fails_then_recovers() -> anyhow::Result<()> {
    let harness = FakeHarness::build(&["--home-policy", "deny DE;deny *"]).await?;

    // Five hubs, all in DE.
    for i in 0..5 {
        let hub = seaward::test_support::hub_with_addr(
            &format!("de-hub-{i}"),
            "127.0.0.1".parse()?,
            40_800 + i,
        );
        harness.instance.map.update_announcement(hub.id.clone(), hub.announcement, false);
    }

    harness.instance.start().await?;
    wait_state(&harness.instance, ClientState::Failed, CONNECT_TIMEOUT).await?;

    let active = harness.instance.notifier.active();
    assert_eq!(active.len(), 1, "exactly one notification: {active:?}");
    assert_eq!(active[0].id, "all-home-hubs-excluded");

    // Widening the policy triggers a retry that succeeds.
    harness.instance.set_policy(Policy::parse(&["allow *"])?);
    wait_state(&harness.instance, ClientState::Connected, CONNECT_TIMEOUT).await?;
    assert!(harness.instance.notifier.active().is_empty(), "notifications resolved");

    harness.shutdown.cancel();
    Ok(())
}

// -- 3. Home node disappears --------------------------------------------------

#[tokio::test]
async fn lost_home_hub_fails_over_to_second_best() -> anyhow::Result<()> {
    let hub_a = SpecHub::spawn("DE").await?;
    let hub_b = SpecHub::spawn("NL").await?;
    let harness = WireHarness::build(&[&hub_a, &hub_b], &[]).await?;

    harness.instance.start().await?;
    wait_state(&harness.instance, ClientState::Connected, CONNECT_TIMEOUT).await?;

    let first = harness
        .instance
        .status
        .current()
        .connected
        .map(|c| c.hub)
        .ok_or_else(|| anyhow::anyhow!("no home"))?;
    let (lost, fallback) =
        if first == hub_a.id() { (&hub_a, &hub_b) } else { (&hub_b, &hub_a) };

    let mut events = harness.instance.status.subscribe();
    lost.drop_connections();
    harness.instance.health.trigger();

    wait_connected_to(&harness.instance, &fallback.id(), CONNECT_TIMEOUT).await?;
    assert!(
        harness.instance.map.is_failing(&lost.id(), tokio::time::Instant::now()),
        "the lost hub sits out"
    );

    let mut reconnect_events = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, Event::Connected { .. }) {
            reconnect_events += 1;
        }
    }
    assert_eq!(reconnect_events, 1, "one fresh connected event after failover");

    harness.shutdown.cancel();
    Ok(())
}

// -- 4. Laptop lid close ------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn sleep_wakeup_reconnects_to_the_same_hub() -> anyhow::Result<()> {
    use seaward::session::{establish, maintain, teardown, MaintainExit};

    let harness = FakeHarness::build(&[]).await?;
    let hub =
        seaward::test_support::hub_with_addr("only-hub", "127.0.0.1".parse()?, 40_900);
    harness.instance.map.update_announcement(hub.id.clone(), hub.announcement, false);

    // Drive one cycle by hand so the paused clock models the nap.
    let mut stale = 0;
    let session = establish(&harness.instance, &mut stale)
        .await
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;

    // Half an hour with no wakeups, then the first ping fails.
    tokio::time::advance(Duration::from_secs(30 * 60)).await;
    let terminal = harness
        .terminals
        .last()
        .ok_or_else(|| anyhow::anyhow!("no terminal"))?;
    terminal.script_ping(Err(seaward::terminal::TerminalError::Timeout));
    harness.instance.health.trigger();

    let exit = maintain(&harness.instance, &session).await;
    assert_eq!(exit, MaintainExit::Reconnect);
    assert!(
        !harness.instance.map.is_failing(&HubId::from("only-hub"), tokio::time::Instant::now()),
        "the home hub is not penalized after a sleep"
    );
    teardown(&harness.instance, session).await;

    // The reconnect picks the same home hub again.
    let session = establish(&harness.instance, &mut stale)
        .await
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;
    assert_eq!(session.hub.id, HubId::from("only-hub"));
    teardown(&harness.instance, session).await;

    harness.shutdown.cancel();
    Ok(())
}

// -- 5. Local ingress dispatch ------------------------------------------------

#[tokio::test]
async fn sluice_dispatches_preregistered_flows() -> anyhow::Result<()> {
    use seaward::netenv::NetworkEnv;
    use seaward::sluice::{FlowConn, Sluice, SluiceConfig, INFO_BANNER};
    use tokio::io::AsyncReadExt;

    let netenv = seaward::test_support::FakeNetEnv::new();
    let shutdown = tokio_util::sync::CancellationToken::new();
    let sluice = Sluice::spawn(
        SluiceConfig { port: 0, ..SluiceConfig::default() },
        netenv as Arc<dyn NetworkEnv>,
        shutdown.clone(),
    )
    .await?;

    // Pre-register under the exact source address of the upcoming flow.
    let socket = tokio::net::TcpSocket::new_v4()?;
    socket.bind("127.0.0.1:0".parse()?)?;
    let source = socket.local_addr()?;

    let (tx, rx) = tokio::sync::oneshot::channel();
    let mut tx = Some(tx);
    sluice.register(
        source,
        Box::new(move |conn| {
            if let Some(tx) = tx.take() {
                let _ = tx.send(matches!(conn, FlowConn::Tcp(_)));
            }
        }),
        None,
    )?;

    let _flow = socket.connect(sluice.tcp4_addr()).await?;
    let delivered = tokio::time::timeout(Duration::from_secs(5), rx).await??;
    assert!(delivered);
    assert_eq!(sluice.pending_len(), 0, "table is empty after the match");

    // A second connection from the same host gets the banner and EOF.
    let mut other = tokio::net::TcpStream::connect(sluice.tcp4_addr()).await?;
    let mut body = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), other.read_to_end(&mut body)).await??;
    assert_eq!(body, INFO_BANNER);

    shutdown.cancel();
    Ok(())
}

// -- 6. Gossip relay ----------------------------------------------------------

#[tokio::test]
async fn gossip_relays_to_other_sessions_exactly_once() -> anyhow::Result<()> {
    use seaward::gossip::wire;
    use seaward::test_support::FakeTerminal;

    let harness = FakeHarness::build(&[]).await?;

    // Two live sessions, A and B.
    let (terminal_a, events_a) = FakeTerminal::new();
    let (terminal_b, events_b) = FakeTerminal::new();
    let scope = harness.shutdown.child_token();
    tokio::spawn(Arc::clone(&harness.instance.gossip).run_session(
        uuid::Uuid::new_v4(),
        terminal_a.clone() as Arc<dyn Terminal>,
        events_a,
        scope.clone(),
    ));
    let session_b = uuid::Uuid::new_v4();
    tokio::spawn(Arc::clone(&harness.instance.gossip).run_session(
        session_b,
        terminal_b.clone() as Arc<dyn Terminal>,
        events_b,
        scope.clone(),
    ));

    // A signed announcement for a brand-new hub arrives on session A.
    let hub_key = seaward::identity::Identity::generate()?;
    let announcement = seaward::node::HubAnnouncement {
        public_key: hub_key.public_key_b64(),
        name: "gossiped-hub".into(),
        transports: vec![seaward::node::TransportEndpoint {
            protocol: seaward::node::TransportKind::Tcp,
            port: 717,
            path: None,
        }],
        ipv4: Some("203.0.113.99".parse()?),
        ipv6: None,
        country: "SE".into(),
        continent: "EU".into(),
        asn: 64510,
        owner: String::new(),
        coords: None,
        timestamp: seaward::node::epoch_ms(),
    };
    let raw = wire::encode_announcement(&hub_key, &announcement)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    terminal_a.inject_gossip(raw.clone()).await;

    // The hub appears in the map; B gets the message exactly once; A
    // never gets it back.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while harness.instance.map.get(hub_key.id()).is_none() {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "hub never ingested");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    while terminal_b.sent_gossip().is_empty() {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "no relay to B");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(terminal_b.sent_gossip(), vec![raw.clone()]);
    assert!(terminal_a.sent_gossip().is_empty(), "split horizon holds");

    // Even if B echoes it back, nothing is relayed a second time.
    terminal_b.inject_gossip(raw).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(terminal_b.sent_gossip().len(), 1);

    harness.shutdown.cancel();
    Ok(())
}

// -- Boundary: zero tokens ----------------------------------------------------

#[tokio::test]
async fn exhausted_tokens_fail_the_client() -> anyhow::Result<()> {
    let harness = FakeHarness::build(&[]).await?;
    let hub = seaward::test_support::hub_with_addr("entry", "127.0.0.1".parse()?, 40_901);
    harness.instance.map.update_announcement(hub.id.clone(), hub.announcement, false);

    // The authority has nothing left to issue.
    harness.authority.set_tokens(0);
    harness.instance.start().await?;

    wait_state(&harness.instance, ClientState::Failed, CONNECT_TIMEOUT).await?;
    let active = harness.instance.notifier.active();
    assert!(
        active.iter().any(|n| n.id == "account-tokens-exhausted"),
        "expected a tokens-exhausted notification, got {active:?}"
    );

    harness.shutdown.cancel();
    Ok(())
}
