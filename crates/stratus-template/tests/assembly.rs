//! End-to-end assembly of service definitions into resource documents

use serde_json::json;

use stratus_common::document::get_att;
use stratus_common::ResourceType;
use stratus_template::assembler::{event_source_logical_id, function_logical_id};
use stratus_template::permission::configurator_id;
use stratus_template::{
    ApiDefinition, ApiResourceDefinition, AssemblerConfig, BasePermission, CodeLocation,
    EventSourceMapping, FunctionDefinition, MethodDefinition, PermissionGrant, Privilege,
    ResourceGraphAssembler, RoleDefinition, ServiceDefinition, StageDefinition, StartingPosition,
};

const BUCKET: &str = "arn:aws:s3:::uploads";
const TOPIC: &str = "arn:aws:sns:us-west-2:123412341234:events";
const TABLE_STREAM: &str =
    "arn:aws:dynamodb:us-west-2:123412341234:table/orders/stream/2024-01-01T00:00:00.000";

fn assembler(seed: u64) -> ResourceGraphAssembler {
    ResourceGraphAssembler::new(AssemblerConfig::new(CodeLocation::new(
        "artifacts",
        "service.zip",
    )))
    .with_seed(seed)
}

fn service() -> ServiceDefinition {
    let uploads = RoleDefinition::new(vec![Privilege::new(
        ["s3:GetObject"],
        format!("{BUCKET}/*"),
    )]);

    ServiceDefinition {
        name: "orders".to_string(),
        description: "Order processing".to_string(),
        functions: vec![
            FunctionDefinition::with_role_definition("orders.OnUpload", uploads.clone())
                .permission(PermissionGrant::bucket_notification(
                    BasePermission::source(BUCKET),
                    ["s3:ObjectCreated:*"],
                )),
            FunctionDefinition::with_role_definition("orders.OnThumb", uploads).permission(
                PermissionGrant::bucket_notification(
                    BasePermission::source(BUCKET).with_account("123412341234"),
                    ["s3:ObjectRemoved:*"],
                ),
            ),
            FunctionDefinition::with_role_name("orders.OnEvent", "orders-exec")
                .permission(PermissionGrant::topic_subscription(BasePermission::source(TOPIC))),
            FunctionDefinition::with_role_definition("orders.OnStream", RoleDefinition::default())
                .event_source(EventSourceMapping::new(
                    TABLE_STREAM,
                    StartingPosition::TrimHorizon,
                    100,
                )),
            FunctionDefinition::with_role_name("orders.Get", "orders-exec"),
        ],
        api: Some(ApiDefinition {
            name: "orders-api".to_string(),
            description: None,
            stage: Some(StageDefinition {
                name: "prod".to_string(),
                description: None,
                variables: Default::default(),
                cache_cluster_enabled: None,
                cache_cluster_size: None,
            }),
            resources: ApiResourceDefinition::default().child(
                "orders",
                ApiResourceDefinition::default()
                    .method("get", MethodDefinition::new("orders.Get")),
            ),
        }),
    }
}

#[test]
fn content_addressed_ids_are_stable_across_runs() {
    let first = assembler(1).assemble(&service()).unwrap();
    let second = assembler(2).assemble(&service()).unwrap();

    let stable = |doc: &stratus_common::ResourceDocument| -> Vec<String> {
        doc.resources
            .iter()
            .filter(|(_, node)| node.type_ != ResourceType::CustomResource)
            .map(|(id, _)| id.clone())
            .collect()
    };
    assert_eq!(stable(&first), stable(&second));
    assert!(first.contains(&function_logical_id("orders.Get")));
}

#[test]
fn identical_role_definitions_share_one_role() {
    let doc = assembler(7).assemble(&service()).unwrap();

    let upload = doc.get(&function_logical_id("orders.OnUpload")).unwrap();
    let thumb = doc.get(&function_logical_id("orders.OnThumb")).unwrap();
    assert_eq!(upload.property("Role"), thumb.property("Role"));
}

#[test]
fn stream_role_carries_scoped_read_statement() {
    let doc = assembler(7).assemble(&service()).unwrap();

    let function = doc.get(&function_logical_id("orders.OnStream")).unwrap();
    let role_id = function.depends_on.iter().next().unwrap();
    let role = doc.get(role_id).unwrap();
    let statements = &role.property("Policies").unwrap()[0]["PolicyDocument"]["Statement"];
    assert_eq!(statements[1]["Resource"], TABLE_STREAM);

    let mapping = EventSourceMapping::new(TABLE_STREAM, StartingPosition::TrimHorizon, 100);
    let node = doc.get(&event_source_logical_id(&mapping)).unwrap();
    assert_eq!(node.type_, ResourceType::EventSourceMapping);
    assert_eq!(node.property("StartingPosition"), Some(&json!("TRIM_HORIZON")));
}

#[test]
fn bucket_grants_share_configurator() {
    let doc = assembler(7).assemble(&service()).unwrap();

    let configurator = configurator_id(stratus_common::S3_PRINCIPAL, BUCKET);
    assert!(doc.contains(&configurator));

    let invokers: Vec<_> = doc
        .resources
        .iter()
        .filter(|(id, _)| id.starts_with("ConfigS3"))
        .collect();
    assert_eq!(invokers.len(), 2);
    for (_, node) in invokers {
        assert!(node.depends_on.contains(&configurator));
        assert_eq!(node.property("ServiceToken"), Some(&get_att(&configurator, "Arn")));
    }
}

#[test]
fn api_custom_resource_targets_function_arns() {
    let doc = assembler(7).assemble(&service()).unwrap();

    let api_id = service().api.unwrap().logical_id();
    let api = doc.get(&api_id).unwrap();
    assert_eq!(api.type_, ResourceType::CustomResource);

    let get_fn = function_logical_id("orders.Get");
    assert!(api.depends_on.contains(&get_fn));

    let method = &api.property("API").unwrap()["Resources"]["Children"]["orders"]["Methods"]["GET"];
    assert_eq!(method["LambdaTarget"], get_att(&get_fn, "Arn"));
    assert_eq!(method["HTTPMethod"], "GET");
    assert_eq!(api.property("API").unwrap()["Stage"]["Name"], "prod");
}

#[test]
fn api_with_unknown_handler_fails_whole_run() {
    let mut definition = service();
    if let Some(api) = definition.api.as_mut() {
        api.resources = ApiResourceDefinition::default()
            .method("post", MethodDefinition::new("orders.Missing"));
    }
    let err = assembler(7).assemble(&definition).unwrap_err();
    assert_eq!(err.function(), Some("orders.Missing"));
}

#[test]
fn service_loads_from_yaml() {
    let yaml = r#"
name: orders
functions:
  - handler: orders.Handle
    roleName: orders-exec
    options:
      timeout: 10
    permissions:
      - type: direct
        principal: events.amazonaws.com
        sourceArn: arn:aws:events:us-west-2:123412341234:rule/nightly
      - type: topicSubscription
        sourceArn: arn:aws:sns:us-west-2:123412341234:events
api:
  name: orders-api
  resources:
    children:
      orders:
        methods:
          GET:
            handler: orders.Handle
"#;
    let definition: ServiceDefinition = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(definition.functions[0].permissions.len(), 2);

    let doc = assembler(3).assemble(&definition).unwrap();
    assert_eq!(doc.description, "orders");
    let function = doc.get(&function_logical_id("orders.Handle")).unwrap();
    assert_eq!(function.property("Timeout"), Some(&json!(10)));
    assert_eq!(doc.ids_of_type(ResourceType::Permission).len(), 2);
}
