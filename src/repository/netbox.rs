use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client as ReqwestClient, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, instrument};

use super::{DeviceCriteria, DeviceRepository};
use crate::error::{AppError, Result};
use crate::models::{
    Cable, CableTermination, Device, DeviceId, DeviceRole, DeviceType, Interface, Manufacturer, RoleId,
    Site, SiteId, Vlan, VlanGroup, VlanGroupId, VlanId,
};

const PAGE_SIZE: &str = "1000";
const ID_CHUNK: usize = 100;

/// Repository reading straight from the NetBox REST API.
///
/// Every call performs fresh GET requests; nothing is cached between requests.
pub struct NetBoxRepository {
    base_url: String,
    token: Option<String>,
    client: ReqwestClient,
}

impl NetBoxRepository {
    pub fn new(base_url: String, token: Option<String>, timeout_secs: u64) -> Result<Self> {
        let client = ReqwestClient::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, url: &str, query: &[(&str, String)]) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .get(url)
            .header(header::ACCEPT, "application/json");

        if !query.is_empty() {
            request = request.query(query);
        }

        // Add authentication if available
        if let Some(token) = &self.token {
            request = request.header(header::AUTHORIZATION, format!("Token {}", token));
        }

        Ok(request.send().await?)
    }

    /// Fetch a single object; a 404 maps to `None`
    async fn get_object<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = self.api_url(path);
        let response = self.send(&url, &[]).await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(AppError::Upstream(format!("GET {} returned {}", url, status))),
        }
    }

    /// Fetch every page of a list endpoint, following `next` links
    async fn list<T: DeserializeOwned>(&self, path: &str, filters: &[(&str, String)]) -> Result<Vec<T>> {
        let mut query: Vec<(&str, String)> = filters.to_vec();
        query.push(("limit", PAGE_SIZE.to_string()));

        let mut url = self.api_url(path);
        let mut results = Vec::new();
        let mut first = true;

        loop {
            // `next` links already carry the query string
            let page_query: &[(&str, String)] = if first { &query } else { &[] };
            let response = self.send(&url, page_query).await?;
            if !response.status().is_success() {
                return Err(AppError::Upstream(format!(
                    "GET {} returned {}",
                    url,
                    response.status()
                )));
            }

            let page: Page<T> = response.json().await?;
            results.extend(page.results);
            debug!("Fetched {} ({} records so far)", url, results.len());

            match page.next {
                Some(next) => {
                    url = next;
                    first = false;
                }
                None => break,
            }
        }

        Ok(results)
    }

    /// List records matching any of `ids` under the `key` filter, a chunk of
    /// ids per listing
    async fn list_by_ids<T: DeserializeOwned>(
        &self,
        path: &str,
        key: &'static str,
        ids: &BTreeSet<u64>,
        filters: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let ids: Vec<u64> = ids.iter().copied().collect();
        let mut results = Vec::new();
        for chunk in ids.chunks(ID_CHUNK) {
            let mut query: Vec<(&str, String)> = filters.to_vec();
            query.extend(chunk.iter().map(|id| (key, id.to_string())));
            results.extend(self.list::<T>(path, &query).await?);
        }
        Ok(results)
    }

    async fn all_sites(&self) -> Result<Vec<Site>> {
        let sites: Vec<NbSite> = self.list("dcim/sites/", &[]).await?;
        Ok(sites.into_iter().map(Site::from).collect())
    }
}

#[async_trait]
impl DeviceRepository for NetBoxRepository {
    #[instrument(name = "netbox_find_devices", skip_all)]
    async fn find_devices(&self, criteria: &DeviceCriteria) -> Result<Vec<Device>> {
        let mut device_filters: Vec<(&str, String)> = criteria
            .roles
            .iter()
            .flatten()
            .map(|id| ("role_id", id.to_string()))
            .collect();
        if criteria.with_interfaces {
            device_filters.push(("interfaces", "true".to_string()));
        }

        let devices: Vec<NbDevice> = match &criteria.vlans {
            Some(vlans) => {
                // Devices owning an interface on one of the VLANs
                let mut candidates = BTreeSet::new();
                for vlan in vlans {
                    let hits: Vec<NbInterface> = self
                        .list("dcim/interfaces/", &[("vlan_id", vlan.to_string())])
                        .await?;
                    candidates.extend(hits.into_iter().map(|i| i.device.id));
                }
                self.list_by_ids("dcim/devices/", "id", &candidates, &device_filters)
                    .await?
            }
            None => self.list("dcim/devices/", &device_filters).await?,
        };

        // Narrowed listings fetch only what the matched devices reference;
        // VLAN checks still need every interface of those devices.
        let (interfaces, sites): (Vec<NbInterface>, Vec<Site>) =
            if criteria.vlans.is_some() || criteria.roles.is_some() {
                let device_ids: BTreeSet<DeviceId> = devices.iter().map(|d| d.id).collect();
                let site_ids: BTreeSet<SiteId> = devices
                    .iter()
                    .filter_map(|d| d.site.as_ref())
                    .map(|s| s.id)
                    .collect();
                let interfaces: Vec<NbInterface> = self
                    .list_by_ids("dcim/interfaces/", "device_id", &device_ids, &[])
                    .await?;
                let sites: Vec<NbSite> = self.list_by_ids("dcim/sites/", "id", &site_ids, &[]).await?;
                (interfaces, sites.into_iter().map(Site::from).collect())
            } else {
                (self.list("dcim/interfaces/", &[]).await?, self.all_sites().await?)
            };

        debug!("Assembling {} devices from {} interfaces", devices.len(), interfaces.len());

        Ok(assemble_devices(devices, interfaces, &sites)
            .into_iter()
            .filter(|d| criteria.matches(d))
            .collect())
    }

    #[instrument(name = "netbox_get_device", skip(self))]
    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>> {
        let Some(device) = self
            .get_object::<NbDevice>(&format!("dcim/devices/{}/", id))
            .await?
        else {
            return Ok(None);
        };

        let interfaces: Vec<NbInterface> = self
            .list("dcim/interfaces/", &[("device_id", id.to_string())])
            .await?;

        let mut sites = Vec::new();
        if let Some(site) = &device.site {
            if let Some(site) = self
                .get_object::<NbSite>(&format!("dcim/sites/{}/", site.id))
                .await?
            {
                sites.push(Site::from(site));
            }
        }

        Ok(assemble_devices(vec![device], interfaces, &sites).pop())
    }

    async fn find_sites_with_location(&self) -> Result<Vec<Site>> {
        Ok(self
            .all_sites()
            .await?
            .into_iter()
            .filter(|s| s.location().is_some())
            .collect())
    }

    async fn find_cables(&self) -> Result<Vec<Cable>> {
        let cables: Vec<NbCable> = self.list("dcim/cables/", &[]).await?;
        Ok(cables.into_iter().map(Cable::from).collect())
    }

    async fn get_vlan(&self, id: VlanId) -> Result<Option<Vlan>> {
        Ok(self
            .get_object::<NbVlan>(&format!("ipam/vlans/{}/", id))
            .await?
            .map(Vlan::from))
    }

    async fn get_vlan_group(&self, id: VlanGroupId) -> Result<Option<VlanGroup>> {
        Ok(self
            .get_object::<NbVlanGroup>(&format!("ipam/vlan-groups/{}/", id))
            .await?
            .map(|g| VlanGroup { id: g.id, name: g.name }))
    }

    async fn find_vlans_in_group(&self, group: VlanGroupId) -> Result<Vec<Vlan>> {
        let vlans: Vec<NbVlan> = self
            .list("ipam/vlans/", &[("group_id", group.to_string())])
            .await?;
        Ok(vlans
            .into_iter()
            .map(Vlan::from)
            .filter(|v| v.group == Some(group))
            .collect())
    }

    async fn find_device_roles(&self, ids: &[RoleId]) -> Result<Vec<DeviceRole>> {
        let roles: Vec<NbRole> = self.list("dcim/device-roles/", &[]).await?;
        Ok(roles
            .into_iter()
            .filter(|r| ids.contains(&r.id))
            .map(DeviceRole::from)
            .collect())
    }
}

/// Join API devices with their interfaces and full site records
fn assemble_devices(devices: Vec<NbDevice>, interfaces: Vec<NbInterface>, sites: &[Site]) -> Vec<Device> {
    let mut by_device: HashMap<DeviceId, Vec<Interface>> = HashMap::new();
    for iface in interfaces {
        by_device.entry(iface.device.id).or_default().push(Interface {
            id: iface.id,
            name: iface.name,
            untagged_vlan: iface.untagged_vlan.map(|v| v.id),
            tagged_vlans: iface.tagged_vlans.into_iter().map(|v| v.id).collect(),
        });
    }

    let sites = site_index(sites);

    devices
        .into_iter()
        .map(|d| {
            let role = d.role.or(d.device_role).map(DeviceRole::from);
            let site = d.site.map(|s| {
                sites.get(&s.id).map(|full| (*full).clone()).unwrap_or(Site {
                    id: s.id,
                    name: s.name.unwrap_or_default(),
                    latitude: None,
                    longitude: None,
                })
            });
            Device {
                id: d.id,
                name: d.name.unwrap_or_default(),
                role,
                site,
                device_type: d.device_type.map(|t| DeviceType {
                    model: t.model,
                    manufacturer: t.manufacturer.map(|m| Manufacturer { name: m.name }),
                }),
                interfaces: by_device.remove(&d.id).unwrap_or_default(),
                custom_fields: d.custom_fields,
                comments: d.comments.unwrap_or_default(),
            }
        })
        .collect()
}

fn site_index(sites: &[Site]) -> HashMap<SiteId, &Site> {
    sites.iter().map(|s| (s.id, s)).collect()
}

// NetBox API representations

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default)]
    next: Option<String>,
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct NbRef {
    id: u64,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NbRole {
    id: RoleId,
    name: String,
    #[serde(default)]
    slug: String,
}

impl From<NbRole> for DeviceRole {
    fn from(role: NbRole) -> Self {
        DeviceRole {
            id: role.id,
            name: role.name,
            slug: role.slug,
        }
    }
}

#[derive(Debug, Deserialize)]
struct NbManufacturer {
    name: String,
}

#[derive(Debug, Deserialize)]
struct NbDeviceType {
    #[serde(default)]
    model: String,
    #[serde(default)]
    manufacturer: Option<NbManufacturer>,
}

#[derive(Debug, Deserialize)]
struct NbDevice {
    id: DeviceId,
    #[serde(default)]
    name: Option<String>,
    // NetBox >= 4.0
    #[serde(default)]
    role: Option<NbRole>,
    // NetBox 3.x
    #[serde(default)]
    device_role: Option<NbRole>,
    #[serde(default)]
    site: Option<NbRef>,
    #[serde(default)]
    device_type: Option<NbDeviceType>,
    #[serde(default, deserialize_with = "null_as_default")]
    custom_fields: HashMap<String, Value>,
    #[serde(default)]
    comments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NbInterface {
    id: u64,
    device: NbRef,
    #[serde(default)]
    name: String,
    #[serde(default)]
    untagged_vlan: Option<NbRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    tagged_vlans: Vec<NbRef>,
}

#[derive(Debug, Deserialize)]
struct NbTermination {
    object_type: String,
    object_id: u64,
}

#[derive(Debug, Deserialize)]
struct NbCable {
    id: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    a_terminations: Vec<NbTermination>,
    #[serde(default, deserialize_with = "null_as_default")]
    b_terminations: Vec<NbTermination>,
}

impl From<NbCable> for Cable {
    fn from(cable: NbCable) -> Self {
        let convert = |terms: Vec<NbTermination>| {
            terms
                .into_iter()
                .map(|t| CableTermination {
                    object_type: t.object_type,
                    object_id: t.object_id,
                })
                .collect()
        };
        Cable {
            id: cable.id,
            a_terminations: convert(cable.a_terminations),
            b_terminations: convert(cable.b_terminations),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NbSite {
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(default, deserialize_with = "coordinate")]
    latitude: Option<f64>,
    #[serde(default, deserialize_with = "coordinate")]
    longitude: Option<f64>,
}

impl From<NbSite> for Site {
    fn from(site: NbSite) -> Self {
        Site {
            id: site.id,
            name: site.name,
            latitude: site.latitude,
            longitude: site.longitude,
        }
    }
}

#[derive(Debug, Deserialize)]
struct NbVlan {
    id: VlanId,
    #[serde(default)]
    vid: u16,
    #[serde(default)]
    name: String,
    #[serde(default)]
    group: Option<NbRef>,
}

impl From<NbVlan> for Vlan {
    fn from(vlan: NbVlan) -> Self {
        Vlan {
            id: vlan.id,
            vid: vlan.vid,
            name: vlan.name,
            group: vlan.group.map(|g| g.id),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NbVlanGroup {
    id: VlanGroupId,
    #[serde(default)]
    name: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decimal fields arrive as numbers or, with decimal coercion on, as strings
fn coordinate<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Number(n)) => Some(n),
        Some(Raw::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}
