use color_eyre::Result;
use gripper_link::{
    events::{TelemetryEvent, TelemetryRecord},
    mock::{MockBuilder, MockDevice},
};
use pretty_assertions::assert_eq;

mod common;

#[tokio::test]
async fn can_connect() -> Result<()> {
    let server = common::start(MockDevice::new()).await?;

    server.connect().await?;

    server.stop().await
}

#[tokio::test]
async fn subscribers_receive_sensor_data() -> Result<()> {
    let server = common::start(MockDevice::new()).await?;
    server.wait_ready().await?;

    let mut first = server.client().await?;
    let mut second = server.client().await?;

    for client in [&mut first, &mut second] {
        let event = common::receive_matching(client, |event| {
            matches!(event, TelemetryEvent::SensorData(_))
        })
        .await?;

        let TelemetryEvent::SensorData(record) = event else {
            unreachable!()
        };
        assert!(record.distance.is_some());
    }

    server.stop().await
}

#[tokio::test]
async fn events_have_the_documented_shape() -> Result<()> {
    let server = common::start(MockBuilder::new().no_telemetry().build()).await?;
    server.wait_ready().await?;

    let mut stream = server.connect().await?;
    server.wait_subscribers(1).await?;

    server.mock.send_line("1.0,2.0,3.0,4.0,5.0");
    assert_eq!(
        common::receive_raw(&mut stream).await?,
        TelemetryEvent::SensorData(TelemetryRecord::example())
    );

    // Too few fields to be telemetry
    server.mock.send_line("1.0,2.0");
    assert_eq!(
        common::receive_raw(&mut stream).await?,
        TelemetryEvent::CommandResponse("1.0,2.0".into())
    );

    server.stop().await
}

#[tokio::test]
async fn malformed_telemetry_is_dropped() -> Result<()> {
    let server = common::start(MockBuilder::new().no_telemetry().build()).await?;
    server.wait_ready().await?;

    let mut client = server.client().await?;
    server.wait_subscribers(1).await?;

    server.mock.send_line("1.0,oops,3.0,4.0");
    server.mock.send_line("OK after");

    // The bad line never shows up
    assert_eq!(
        common::receive(&mut client).await?,
        TelemetryEvent::CommandResponse("OK after".into())
    );

    server.stop().await
}

#[tokio::test]
async fn late_subscriber_gets_no_backlog() -> Result<()> {
    let server = common::start(MockBuilder::new().no_telemetry().build()).await?;
    server.wait_ready().await?;

    let mut early = server.client().await?;
    server.wait_subscribers(1).await?;

    server.mock.send_line("OK first");
    assert_eq!(
        common::receive(&mut early).await?,
        TelemetryEvent::CommandResponse("OK first".into())
    );

    let mut late = server.client().await?;
    server.wait_subscribers(2).await?;

    server.mock.send_line("OK second");

    assert_eq!(
        common::receive(&mut late).await?,
        TelemetryEvent::CommandResponse("OK second".into())
    );
    assert_eq!(
        common::receive(&mut early).await?,
        TelemetryEvent::CommandResponse("OK second".into())
    );

    server.stop().await
}

#[tokio::test]
async fn disconnecting_client_is_unregistered() -> Result<()> {
    let server = common::start(MockDevice::new()).await?;

    let first = server.client().await?;
    let _second = server.client().await?;
    server.wait_subscribers(2).await?;

    first.close().await?;
    server.wait_subscribers(1).await?;

    server.stop().await
}

#[tokio::test]
async fn shutdown_ends_streams() -> Result<()> {
    let server = common::start(MockDevice::new()).await?;
    server.wait_ready().await?;

    let mut client = server.client().await?;
    server.wait_subscribers(1).await?;

    server.stop().await?;

    // Whatever was in flight, then the end.
    let ended = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            match client.next_event().await {
                Ok(Some(_)) => continue,
                _ => return,
            }
        }
    })
    .await;
    assert!(ended.is_ok());

    Ok(())
}
