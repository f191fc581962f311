use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use smartflow_controller::config::EntityConfig;
use smartflow_controller::domain::HardwareMode;
use smartflow_controller::hardware::{Actuator, HaError, HomeAssistantActuator, HomeAssistantClient};
use smartflow_controller::sensors::SensorStore;

const TOKEN: &str = "test-token";

fn client(server: &MockServer) -> HomeAssistantClient {
    HomeAssistantClient::new(format!("{}/", server.uri()), TOKEN, Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn test_get_state_reads_entity() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/states/sensor.battery_soc"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entity_id": "sensor.battery_soc",
            "state": "57",
            "attributes": { "unit_of_measurement": "%" }
        })))
        .mount(&server)
        .await;

    let ha = client(&server);
    let state = ha.get_state("sensor.battery_soc").await.unwrap().unwrap();
    assert_eq!(state.state, "57");
    assert_eq!(ha.get("sensor.battery_soc").await.unwrap().as_deref(), Some("57"));
}

#[tokio::test]
async fn test_unknown_entity_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/states/sensor.missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let ha = client(&server);
    assert!(ha.get_state("sensor.missing").await.unwrap().is_none());
    assert!(ha.get("sensor.missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_price_feed_attribute() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/states/sensor.price_feed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entity_id": "sensor.price_feed",
            "state": "0.31",
            "attributes": {
                "data": [
                    { "start_time": "2025-01-15T18:00:00+01:00", "price_per_kwh": 0.42 }
                ]
            }
        })))
        .mount(&server)
        .await;

    let ha = client(&server);
    let data = ha.get_attribute("sensor.price_feed", "data").await.unwrap().unwrap();
    assert_eq!(data[0]["price_per_kwh"], json!(0.42));
    assert!(ha.get_attribute("sensor.price_feed", "other").await.unwrap().is_none());
}

#[tokio::test]
async fn test_rejected_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client(&server).get_state("sensor.battery_soc").await.unwrap_err();
    assert!(matches!(err, HaError::AuthenticationFailed));
}

#[tokio::test]
async fn test_actuator_service_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/services/select/select_option"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_json(json!({ "entity_id": "select.ac_mode", "option": "output" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/services/number/set_value"))
        .and(body_json(json!({ "entity_id": "number.output_limit", "value": 321.0 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let entities = EntityConfig {
        ac_mode: "select.ac_mode".into(),
        input_limit: "number.input_limit".into(),
        output_limit: "number.output_limit".into(),
        ..EntityConfig::default()
    };
    let actuator = HomeAssistantActuator::new(client(&server), &entities);
    actuator.select_mode(HardwareMode::Output).await.unwrap();
    actuator.set_power_limit(HardwareMode::Output, 320.6).await.unwrap();
}

#[tokio::test]
async fn test_failed_service_call_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/services/number/set_value"))
        .respond_with(ResponseTemplate::new(500).set_body_string("entity unavailable"))
        .mount(&server)
        .await;

    let err = client(&server)
        .call_service(
            "number",
            "set_value",
            json!({ "entity_id": "number.input_limit", "value": 100 }),
        )
        .await
        .unwrap_err();
    match err {
        HaError::ServiceCallFailed { service, reason } => {
            assert_eq!(service, "number.set_value");
            assert_eq!(reason, "entity unavailable");
        }
        other => panic!("unexpected error: {other}"),
    }
}
