//! End-to-end dispatcher tests over an in-memory EC2
//!
//! The AWS handlers run unchanged against a fake [`Ec2Api`], so these tests
//! exercise provider resolution, the read-through cache, cascading delete
//! gates, incremental rule replacement, events and audit entries together.

use async_trait::async_trait;
use cloudnet::aws::api::{IpPermission, NetworkInterface, RouteTable, SecurityGroup, Subnet, Vpc};
use cloudnet::aws::{AwsHandlers, Ec2Api, Ec2Connector};
use cloudnet::cache::{CacheBackend, CacheError};
use cloudnet::events::{AuditEntry, AuditLogger, EventPublisher, EventVerb, ResourceEvent};
use cloudnet::model::{
    CreateSecurityGroupRequest, CreateSubnetRequest, CreateVpcRequest, Direction, ResourceState,
    RuleInfo, SecurityGroupRules, SecurityGroupScope, SubnetScope, Tags, UpdateSecurityGroupRequest,
    UpdateVpcRequest, VpcScope,
};
use cloudnet::ncp::NcpHandlers;
use cloudnet::{
    Credential, CredentialData, ErrorKind, HandlerSet, ListQuery, MemoryCache, NetError,
    NetworkService, Provider, ProviderRegistry, RequestContext, ResourceCache, ResourceKind, Verb,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const REGION: &str = "us-east-1";

#[derive(Default)]
struct Ec2State {
    next_id: u32,
    vpcs: Vec<Vpc>,
    subnets: Vec<Subnet>,
    route_tables: Vec<RouteTable>,
    groups: Vec<SecurityGroup>,
    interfaces: Vec<(String, NetworkInterface)>,
}

impl Ec2State {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:08x}", prefix, self.next_id)
    }
}

/// In-memory EC2 with call counters
#[derive(Default)]
struct FakeEc2 {
    state: Mutex<Ec2State>,
    describe_vpcs_calls: AtomicUsize,
}

impl FakeEc2 {
    fn attach_instance(&self, vpc_id: &str, instance_id: &str) {
        let mut state = self.state.lock().unwrap();
        let interface_id = state.id("eni");
        state.interfaces.push((
            vpc_id.to_string(),
            NetworkInterface {
                interface_id,
                subnet_id: None,
                instance_id: Some(instance_id.to_string()),
            },
        ));
    }

    fn detach_all(&self) {
        self.state.lock().unwrap().interfaces.clear();
    }

    fn vpc_lookups(&self) -> usize {
        self.describe_vpcs_calls.load(Ordering::SeqCst)
    }
}

fn wanted(ids: &[String], id: &str) -> bool {
    ids.is_empty() || ids.iter().any(|i| i == id)
}

fn same_permission(a: &IpPermission, b: &IpPermission) -> bool {
    a.protocol == b.protocol
        && a.from_port == b.from_port
        && a.to_port == b.to_port
        && a.cidr_blocks == b.cidr_blocks
}

#[async_trait]
impl Ec2Api for FakeEc2 {
    async fn describe_vpcs(&self, ids: &[String]) -> cloudnet::Result<Vec<Vpc>> {
        self.describe_vpcs_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        Ok(state
            .vpcs
            .iter()
            .filter(|v| wanted(ids, &v.vpc_id))
            .cloned()
            .collect())
    }

    async fn create_vpc(&self, cidr_block: &str, tags: &Tags) -> cloudnet::Result<Vpc> {
        let mut state = self.state.lock().unwrap();
        let vpc_id = state.id("vpc");
        let vpc = Vpc {
            vpc_id,
            cidr_block: Some(cidr_block.to_string()),
            state: Some("available".to_string()),
            is_default: false,
            tags: tags.clone(),
        };
        state.vpcs.push(vpc.clone());
        // The create response reports the VPC before it is available
        Ok(Vpc {
            state: Some("pending".to_string()),
            ..vpc
        })
    }

    async fn delete_vpc(&self, vpc_id: &str) -> cloudnet::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.subnets.iter().any(|s| s.vpc_id == vpc_id) {
            return Err(NetError::Conflict(format!(
                "The vpc '{}' has dependencies and cannot be deleted.",
                vpc_id
            )));
        }
        let before = state.vpcs.len();
        state.vpcs.retain(|v| v.vpc_id != vpc_id);
        if state.vpcs.len() == before {
            return Err(NetError::not_found(ResourceKind::Vpc, vpc_id));
        }
        Ok(())
    }

    async fn describe_subnets(
        &self,
        vpc_id: Option<&str>,
        ids: &[String],
    ) -> cloudnet::Result<Vec<Subnet>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .subnets
            .iter()
            .filter(|s| vpc_id.map_or(true, |v| s.vpc_id == v))
            .filter(|s| wanted(ids, &s.subnet_id))
            .cloned()
            .collect())
    }

    async fn create_subnet(
        &self,
        vpc_id: &str,
        cidr_block: &str,
        availability_zone: Option<&str>,
        tags: &Tags,
    ) -> cloudnet::Result<Subnet> {
        let mut state = self.state.lock().unwrap();
        let subnet = Subnet {
            subnet_id: state.id("subnet"),
            vpc_id: vpc_id.to_string(),
            cidr_block: cidr_block.to_string(),
            availability_zone: availability_zone.map(str::to_string),
            state: Some("available".to_string()),
            tags: tags.clone(),
        };
        state.subnets.push(subnet.clone());
        Ok(subnet)
    }

    async fn delete_subnet(&self, subnet_id: &str) -> cloudnet::Result<()> {
        self.state
            .lock()
            .unwrap()
            .subnets
            .retain(|s| s.subnet_id != subnet_id);
        Ok(())
    }

    async fn describe_route_tables(&self, vpc_id: &str) -> cloudnet::Result<Vec<RouteTable>> {
        let state = self.state.lock().unwrap();
        let subnet_ids: Vec<&str> = state
            .subnets
            .iter()
            .filter(|s| s.vpc_id == vpc_id)
            .map(|s| s.subnet_id.as_str())
            .collect();
        Ok(state
            .route_tables
            .iter()
            .filter(|t| t.main || t.subnet_ids.iter().any(|s| subnet_ids.contains(&s.as_str())))
            .cloned()
            .collect())
    }

    async fn describe_security_groups(
        &self,
        ids: &[String],
    ) -> cloudnet::Result<Vec<SecurityGroup>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .groups
            .iter()
            .filter(|g| wanted(ids, &g.group_id))
            .cloned()
            .collect())
    }

    async fn create_security_group(
        &self,
        name: &str,
        description: &str,
        vpc_id: &str,
        tags: &Tags,
    ) -> cloudnet::Result<String> {
        let mut state = self.state.lock().unwrap();
        let group_id = state.id("sg");
        state.groups.push(SecurityGroup {
            group_id: group_id.clone(),
            group_name: name.to_string(),
            description: description.to_string(),
            vpc_id: Some(vpc_id.to_string()),
            ingress: Vec::new(),
            egress: Vec::new(),
            tags: tags.clone(),
        });
        Ok(group_id)
    }

    async fn delete_security_group(&self, group_id: &str) -> cloudnet::Result<()> {
        self.state
            .lock()
            .unwrap()
            .groups
            .retain(|g| g.group_id != group_id);
        Ok(())
    }

    async fn authorize(
        &self,
        group_id: &str,
        direction: Direction,
        permission: &IpPermission,
    ) -> cloudnet::Result<()> {
        let mut state = self.state.lock().unwrap();
        let group = state
            .groups
            .iter_mut()
            .find(|g| g.group_id == group_id)
            .ok_or_else(|| NetError::not_found(ResourceKind::SecurityGroup, group_id))?;
        let rules = match direction {
            Direction::Ingress => &mut group.ingress,
            Direction::Egress => &mut group.egress,
        };
        if rules.iter().any(|p| same_permission(p, permission)) {
            return Err(NetError::Conflict("the specified rule already exists".into()));
        }
        rules.push(permission.clone());
        Ok(())
    }

    async fn revoke(
        &self,
        group_id: &str,
        direction: Direction,
        permission: &IpPermission,
    ) -> cloudnet::Result<()> {
        let mut state = self.state.lock().unwrap();
        let group = state
            .groups
            .iter_mut()
            .find(|g| g.group_id == group_id)
            .ok_or_else(|| NetError::not_found(ResourceKind::SecurityGroup, group_id))?;
        let rules = match direction {
            Direction::Ingress => &mut group.ingress,
            Direction::Egress => &mut group.egress,
        };
        rules.retain(|p| !same_permission(p, permission));
        Ok(())
    }

    async fn create_tags(&self, resource_id: &str, tags: &Tags) -> cloudnet::Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(vpc) = state.vpcs.iter_mut().find(|v| v.vpc_id == resource_id) {
            vpc.tags.extend(tags.clone());
        }
        if let Some(group) = state.groups.iter_mut().find(|g| g.group_id == resource_id) {
            group.tags.extend(tags.clone());
        }
        Ok(())
    }

    async fn describe_network_interfaces(
        &self,
        vpc_id: &str,
    ) -> cloudnet::Result<Vec<NetworkInterface>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .interfaces
            .iter()
            .filter(|(vpc, _)| vpc == vpc_id)
            .map(|(_, eni)| eni.clone())
            .collect())
    }
}

struct FakeConnector {
    ec2: Arc<FakeEc2>,
    connects: AtomicUsize,
}

#[async_trait]
impl Ec2Connector for FakeConnector {
    async fn connect(
        &self,
        secrets: &CredentialData,
        region: &str,
    ) -> cloudnet::Result<Arc<dyn Ec2Api>> {
        secrets.require("access_key")?;
        secrets.require("secret_key")?;
        assert_eq!(region, REGION);
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.ec2.clone())
    }
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<ResourceEvent>>,
    audit: Mutex<Vec<AuditEntry>>,
}

impl Recorder {
    fn event_types(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(ResourceEvent::event_type)
            .collect()
    }

    fn actions(&self) -> Vec<String> {
        self.audit
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.action.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for Recorder {
    async fn publish(&self, event: &ResourceEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[async_trait]
impl AuditLogger for Recorder {
    async fn log_action(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        self.audit.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

/// Backend whose every call fails
struct UnavailableBackend;

#[async_trait]
impl CacheBackend for UnavailableBackend {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
}

struct Harness {
    service: NetworkService,
    ec2: Arc<FakeEc2>,
    connector: Arc<FakeConnector>,
    recorder: Arc<Recorder>,
}

fn harness(cache: ResourceCache) -> Harness {
    let ec2 = Arc::new(FakeEc2::default());
    let connector = Arc::new(FakeConnector {
        ec2: ec2.clone(),
        connects: AtomicUsize::new(0),
    });
    let recorder = Arc::new(Recorder::default());

    let registry = ProviderRegistry::new()
        .with(
            Provider::Aws,
            HandlerSet::from_shared(Arc::new(AwsHandlers::new(connector.clone()))),
        )
        .with(Provider::Ncp, HandlerSet::from_shared(Arc::new(NcpHandlers)));
    let service = NetworkService::builder(registry)
        .cache(cache)
        .events(recorder.clone())
        .audit(recorder.clone())
        .build();

    Harness {
        service,
        ec2,
        connector,
        recorder,
    }
}

fn memory_cache() -> ResourceCache {
    ResourceCache::new(Arc::new(MemoryCache::new()), Duration::from_secs(300))
}

fn aws_credential() -> Credential {
    Credential::new(
        "aws",
        br#"{"access_key":"AKIAEXAMPLE","secret_key":"s3cr3t"}"#.to_vec(),
    )
}

fn ctx() -> RequestContext {
    RequestContext::new().with_actor("alice")
}

fn vpcs() -> VpcScope {
    VpcScope::region(REGION)
}

#[tokio::test]
async fn vpc_lifecycle_with_instance_gate() {
    let h = harness(memory_cache());
    let credential = aws_credential();

    let created = h
        .service
        .create_vpc(
            &ctx(),
            &credential,
            &vpcs(),
            &CreateVpcRequest::new("test-vpc").cidr("10.0.0.0/16"),
        )
        .await
        .unwrap();
    assert_eq!(created.name, "test-vpc");
    assert_eq!(created.cidr.as_deref(), Some("10.0.0.0/16"));
    assert_eq!(created.state, ResourceState::Creating);

    let fetched = h
        .service
        .get_vpc(&ctx(), &credential, &vpcs(), &created.id)
        .await
        .unwrap();
    assert_eq!(fetched.state, ResourceState::Active);
    assert_eq!(fetched.region.as_deref(), Some(REGION));

    h.ec2.attach_instance(&created.id, "i-0123456789");
    let err = h
        .service
        .delete_vpc(&ctx(), &credential, &vpcs(), &created.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(err.status_code(), 409);
    assert!(err.to_string().contains("i-0123456789"));

    let listed = h
        .service
        .list_vpcs(&ctx(), &credential, &vpcs(), &ListQuery::new())
        .await
        .unwrap();
    assert_eq!(listed.total, 1);

    h.ec2.detach_all();
    h.service
        .delete_vpc(&ctx(), &credential, &vpcs(), &created.id)
        .await
        .unwrap();

    let listed = h
        .service
        .list_vpcs(&ctx(), &credential, &vpcs(), &ListQuery::new())
        .await
        .unwrap();
    assert!(listed.items.iter().all(|v| v.id != created.id));

    let err = h
        .service
        .get_vpc(&ctx(), &credential, &vpcs(), &created.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // The blocked delete leaves no trace
    assert_eq!(
        h.recorder.event_types(),
        vec!["network.vpc.aws.created", "network.vpc.aws.deleted"]
    );
    assert_eq!(h.recorder.actions(), vec!["vpc.create", "vpc.delete"]);

    let audit = h.recorder.audit.lock().unwrap();
    assert_eq!(audit[0].actor, "alice");
    assert_eq!(audit[0].resource_path, "POST /api/v1/aws/networks/vpcs");
    assert_eq!(
        audit[1].resource_path,
        format!("DELETE /api/v1/aws/networks/vpcs/{}", created.id)
    );
}

#[tokio::test]
async fn list_reads_through_cache_and_mutations_invalidate() {
    let h = harness(memory_cache());
    let credential = aws_credential();

    for _ in 0..3 {
        h.service
            .list_vpcs(&ctx(), &credential, &vpcs(), &ListQuery::new())
            .await
            .unwrap();
    }
    assert_eq!(h.ec2.vpc_lookups(), 1);

    h.service
        .create_vpc(
            &ctx(),
            &credential,
            &vpcs(),
            &CreateVpcRequest::new("edge").cidr("10.1.0.0/16"),
        )
        .await
        .unwrap();

    let listed = h
        .service
        .list_vpcs(&ctx(), &credential, &vpcs(), &ListQuery::new())
        .await
        .unwrap();
    assert_eq!(listed.total, 1);
    assert_eq!(h.ec2.vpc_lookups(), 2);
}

#[tokio::test]
async fn vpc_update_invalidates_the_cached_collection() {
    let h = harness(memory_cache());
    let credential = aws_credential();

    let vpc = h
        .service
        .create_vpc(&ctx(), &credential, &vpcs(), &CreateVpcRequest::new("old").cidr("10.0.0.0/16"))
        .await
        .unwrap();
    let listed = h
        .service
        .list_vpcs(&ctx(), &credential, &vpcs(), &ListQuery::new())
        .await
        .unwrap();
    assert_eq!(listed.items[0].name, "old");

    let request = UpdateVpcRequest {
        name: Some("renamed".to_string()),
        ..Default::default()
    };
    h.service
        .update_vpc(&ctx(), &credential, &vpcs(), &vpc.id, &request)
        .await
        .unwrap();

    let listed = h
        .service
        .list_vpcs(&ctx(), &credential, &vpcs(), &ListQuery::new())
        .await
        .unwrap();
    assert_eq!(listed.items[0].name, "renamed");
    assert_eq!(h.ec2.vpc_lookups(), 3);
}

#[tokio::test]
async fn security_group_update_invalidates_the_cached_collection() {
    let h = harness(memory_cache());
    let credential = aws_credential();

    let vpc = h
        .service
        .create_vpc(&ctx(), &credential, &vpcs(), &CreateVpcRequest::new("app").cidr("10.0.0.0/16"))
        .await
        .unwrap();
    let scope = SecurityGroupScope::region(REGION).in_vpc(&vpc.id);
    let group = h
        .service
        .create_security_group(
            &ctx(),
            &credential,
            &scope,
            &CreateSecurityGroupRequest::new("web", "web servers"),
        )
        .await
        .unwrap();

    let listed = h
        .service
        .list_security_groups(&ctx(), &credential, &scope, &ListQuery::new())
        .await
        .unwrap();
    assert!(listed.items[0].tags.get("team").is_none());

    let request = UpdateSecurityGroupRequest {
        tags: Tags::from([("team".to_string(), "edge".to_string())]),
        ..Default::default()
    };
    h.service
        .update_security_group(&ctx(), &credential, &scope, &group.id, &request)
        .await
        .unwrap();

    let listed = h
        .service
        .list_security_groups(&ctx(), &credential, &scope, &ListQuery::new())
        .await
        .unwrap();
    assert_eq!(listed.items[0].tags.get("team").map(String::as_str), Some("edge"));
}

#[tokio::test]
async fn security_group_lists_share_the_regional_collection() {
    let h = harness(memory_cache());
    let credential = aws_credential();

    let mut groups = Vec::new();
    for (name, cidr) in [("blue", "10.0.0.0/16"), ("green", "10.1.0.0/16")] {
        let vpc = h
            .service
            .create_vpc(&ctx(), &credential, &vpcs(), &CreateVpcRequest::new(name).cidr(cidr))
            .await
            .unwrap();
        let group = h
            .service
            .create_security_group(
                &ctx(),
                &credential,
                &SecurityGroupScope::region(REGION).in_vpc(&vpc.id),
                &CreateSecurityGroupRequest::new(name, "app tier"),
            )
            .await
            .unwrap();
        groups.push((vpc.id, group.id));
    }
    let (blue_vpc, blue_group) = &groups[0];
    let (green_vpc, green_group) = &groups[1];

    let blue = h
        .service
        .list_security_groups(
            &ctx(),
            &credential,
            &SecurityGroupScope::region(REGION).in_vpc(blue_vpc),
            &ListQuery::new(),
        )
        .await
        .unwrap();
    assert_eq!(blue.total, 1);
    assert_eq!(&blue.items[0].id, blue_group);

    let all = h
        .service
        .list_security_groups(
            &ctx(),
            &credential,
            &SecurityGroupScope::region(REGION),
            &ListQuery::new(),
        )
        .await
        .unwrap();
    assert_eq!(all.total, 2);

    let green = h
        .service
        .list_security_groups(
            &ctx(),
            &credential,
            &SecurityGroupScope::region(REGION).in_vpc(green_vpc),
            &ListQuery::new(),
        )
        .await
        .unwrap();
    assert_eq!(green.total, 1);
    assert_eq!(&green.items[0].id, green_group);
}

#[tokio::test]
async fn queries_run_on_cached_collections() {
    let h = harness(memory_cache());
    let credential = aws_credential();

    for (name, cidr) in [("web", "10.0.0.0/16"), ("db", "10.1.0.0/16"), ("web-2", "10.2.0.0/16")] {
        h.service
            .create_vpc(&ctx(), &credential, &vpcs(), &CreateVpcRequest::new(name).cidr(cidr))
            .await
            .unwrap();
    }

    let query = ListQuery::new()
        .search("WEB")
        .sort("name", cloudnet::SortOrder::Desc)
        .page(1, 1);
    let first = h
        .service
        .list_vpcs(&ctx(), &credential, &vpcs(), &query)
        .await
        .unwrap();
    let second = h
        .service
        .list_vpcs(&ctx(), &credential, &vpcs(), &query.clone().page(2, 1))
        .await
        .unwrap();

    assert_eq!(first.total, 2);
    assert_eq!(first.items[0].name, "web-2");
    assert_eq!(second.items[0].name, "web");
    // One provider call served both pages
    assert_eq!(h.ec2.vpc_lookups(), 1);
}

#[tokio::test]
async fn unavailable_cache_fails_open() {
    let h = harness(ResourceCache::new(
        Arc::new(UnavailableBackend),
        Duration::from_secs(300),
    ));
    let credential = aws_credential();

    let created = h
        .service
        .create_vpc(
            &ctx(),
            &credential,
            &vpcs(),
            &CreateVpcRequest::new("resilient").cidr("10.9.0.0/16"),
        )
        .await
        .unwrap();

    for _ in 0..2 {
        let listed = h
            .service
            .list_vpcs(&ctx(), &credential, &vpcs(), &ListQuery::new())
            .await
            .unwrap();
        assert_eq!(listed.items[0].id, created.id);
    }
    assert_eq!(h.ec2.vpc_lookups(), 2);
}

#[tokio::test]
async fn subnet_invalidation_reaches_the_vpc_collection() {
    let h = harness(memory_cache());
    let credential = aws_credential();

    let vpc = h
        .service
        .create_vpc(&ctx(), &credential, &vpcs(), &CreateVpcRequest::new("net").cidr("10.0.0.0/16"))
        .await
        .unwrap();
    let scope = SubnetScope::new(&vpc.id, REGION);

    let empty = h
        .service
        .list_subnets(&ctx(), &credential, &scope, &ListQuery::new())
        .await
        .unwrap();
    assert_eq!(empty.total, 0);

    let mut request = CreateSubnetRequest::new("public-a", "10.0.1.0/24");
    request.availability_zone = Some("us-east-1a".to_string());
    let subnet = h
        .service
        .create_subnet(&ctx(), &credential, &scope, &request)
        .await
        .unwrap();
    assert_eq!(subnet.vpc_id, vpc.id);
    assert_eq!(subnet.availability_zone.as_deref(), Some("us-east-1a"));
    assert!(!subnet.is_public);

    let listed = h
        .service
        .list_subnets(&ctx(), &credential, &scope, &ListQuery::new())
        .await
        .unwrap();
    assert_eq!(listed.total, 1);

    // EC2 refuses while the subnet exists
    let err = h
        .service
        .delete_vpc(&ctx(), &credential, &vpcs(), &vpc.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn rules_are_replaced_one_by_one() {
    let h = harness(memory_cache());
    let credential = aws_credential();

    let vpc = h
        .service
        .create_vpc(&ctx(), &credential, &vpcs(), &CreateVpcRequest::new("app").cidr("10.0.0.0/16"))
        .await
        .unwrap();
    let scope = SecurityGroupScope::region(REGION).in_vpc(&vpc.id);

    let mut request = CreateSecurityGroupRequest::new("web", "web servers");
    request.rules = vec![RuleInfo::new(Direction::Ingress, "tcp")
        .ports(22, 22)
        .cidr("10.0.0.0/8")];
    let group = h
        .service
        .create_security_group(&ctx(), &credential, &scope, &request)
        .await
        .unwrap();
    assert_eq!(group.rules.len(), 1);
    assert_eq!(group.vpc_id, vpc.id);

    let rules = SecurityGroupRules {
        ingress: vec![
            RuleInfo::new(Direction::Ingress, "tcp")
                .ports(443, 443)
                .cidr("0.0.0.0/0"),
            RuleInfo::new(Direction::Ingress, "tcp")
                .ports(80, 80)
                .cidr("0.0.0.0/0"),
        ],
        egress: vec![RuleInfo::new(Direction::Egress, "all").cidr("0.0.0.0/0")],
    };
    let replaced = h
        .service
        .update_security_group_rules(&ctx(), &credential, &scope, &group.id, &rules)
        .await
        .unwrap();

    let ingress: Vec<Option<u16>> = replaced
        .rules
        .iter()
        .filter(|r| r.direction == Direction::Ingress)
        .map(|r| r.from_port)
        .collect();
    assert_eq!(ingress, vec![Some(443), Some(80)]);
    let egress: Vec<&RuleInfo> = replaced
        .rules
        .iter()
        .filter(|r| r.direction == Direction::Egress)
        .collect();
    assert_eq!(egress.len(), 1);
    assert_eq!(egress[0].protocol, "all");

    // Cached group was refreshed
    let fetched = h
        .service
        .get_security_group(&ctx(), &credential, &scope, &group.id)
        .await
        .unwrap();
    assert_eq!(fetched.rules, replaced.rules);

    let removed = h
        .service
        .remove_security_group_rule(&ctx(), &credential, &scope, &group.id, &rules.ingress[1])
        .await
        .unwrap();
    assert_eq!(removed.rules.len(), 2);

    assert_eq!(
        h.recorder.actions(),
        vec![
            "vpc.create",
            "security_group.create",
            "security_group.rule.replace",
            "security_group.rule.remove",
        ]
    );
}

#[tokio::test]
async fn deny_rules_are_rejected_for_aws() {
    let h = harness(ResourceCache::disabled());
    let credential = aws_credential();

    let mut rule = RuleInfo::new(Direction::Ingress, "tcp").ports(22, 22);
    rule.action = cloudnet::model::RuleAction::Deny;
    let err = h
        .service
        .add_security_group_rule(
            &ctx(),
            &credential,
            &SecurityGroupScope::region(REGION),
            "sg-1",
            &rule,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailed);
}

#[tokio::test]
async fn vpc_id_passed_as_region_is_rejected() {
    let h = harness(ResourceCache::disabled());

    let err = h
        .service
        .list_vpcs(
            &ctx(),
            &aws_credential(),
            &VpcScope::region("vpc-0abc1234"),
            &ListQuery::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    assert!(err.to_string().contains("appears to be a VPC ID"));
    assert_eq!(h.connector.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn aws_vpc_requires_cidr() {
    let h = harness(ResourceCache::disabled());

    let err = h
        .service
        .create_vpc(&ctx(), &aws_credential(), &vpcs(), &CreateVpcRequest::new("no-cidr"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    assert!(h.recorder.event_types().is_empty());
}

#[tokio::test]
async fn unknown_provider_is_not_supported() {
    let h = harness(ResourceCache::disabled());
    let credential = Credential::new("oracle", b"{}".to_vec());

    let err = h
        .service
        .list_vpcs(&ctx(), &credential, &vpcs(), &ListQuery::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotSupported);
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn unregistered_and_stub_providers_are_not_implemented() {
    let h = harness(ResourceCache::disabled());

    let err = h
        .service
        .list_vpcs(
            &ctx(),
            &Credential::new("gcp", b"{}".to_vec()),
            &vpcs(),
            &ListQuery::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        NetError::NotImplemented {
            provider: Provider::Gcp,
            kind: ResourceKind::Vpc,
            verb: Verb::List
        }
    ));

    let err = h
        .service
        .delete_subnet(
            &ctx(),
            &Credential::new("ncp", b"{}".to_vec()),
            &SubnetScope::new("vpc-1", "KR"),
            "subnet-1",
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotImplemented);
    assert_eq!(err.status_code(), 501);
}

#[tokio::test]
async fn missing_secrets_fail_validation() {
    let h = harness(ResourceCache::disabled());

    let err = h
        .service
        .list_vpcs(
            &ctx(),
            &Credential::new("aws", br#"{"access_key":"AKIA"}"#.to_vec()),
            &vpcs(),
            &ListQuery::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ValidationFailed);
}

#[tokio::test]
async fn cancelled_request_never_reaches_the_provider() {
    let h = harness(ResourceCache::disabled());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h
        .service
        .list_vpcs(
            &RequestContext::new().with_cancel(cancel),
            &aws_credential(),
            &vpcs(),
            &ListQuery::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(h.ec2.vpc_lookups(), 0);
}

#[tokio::test]
async fn created_event_carries_the_payload() {
    let h = harness(ResourceCache::disabled());

    let created = h
        .service
        .create_vpc(
            &ctx(),
            &aws_credential(),
            &vpcs(),
            &CreateVpcRequest::new("events").cidr("10.3.0.0/16"),
        )
        .await
        .unwrap();

    let events = h.recorder.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].verb, EventVerb::Created);
    assert_eq!(events[0].provider, Provider::Aws);
    assert_eq!(events[0].region.as_deref(), Some(REGION));
    assert_eq!(events[0].payload.resource_id(), created.id);
}
