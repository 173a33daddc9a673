//! OpenRTB 2.5 compatible bid request/response types.
//! Subset of fields relevant to AdServe auction handling.

use serde::{Deserialize, Serialize};

/// OpenRTB Bid Request (simplified).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidRequest {
    pub id: String,
    pub imp: Vec<Impression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<Site>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<App>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(default)]
    pub tmax: u32,
    #[serde(default)]
    pub at: u32,
    #[serde(default)]
    pub cur: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<serde_json::Value>,
}

impl BidRequest {
    /// Country code of the requesting device, if any.
    pub fn country(&self) -> Option<&str> {
        self.device
            .as_ref()
            .and_then(|d| d.geo.as_ref())
            .and_then(|g| g.country.as_deref())
    }

    /// Integer-coded device type (1 = mobile).
    pub fn device_type(&self) -> Option<u32> {
        self.device.as_ref().and_then(|d| d.devicetype)
    }

    /// Stable user id when the request carries one.
    pub fn user_id(&self) -> Option<&str> {
        self.user
            .as_ref()
            .and_then(|u| u.id.as_deref().or(u.buyeruid.as_deref()))
            .filter(|id| !id.is_empty())
    }

    /// Whether the site carries at least one content category.
    pub fn has_site_category(&self) -> bool {
        self.site
            .as_ref()
            .and_then(|s| s.cat.as_ref())
            .is_some_and(|cats| !cats.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Impression {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<Banner>,
    #[serde(default)]
    pub bidfloor: f64,
    #[serde(default = "default_bidfloorcur")]
    pub bidfloorcur: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<serde_json::Value>,
}

fn default_bidfloorcur() -> String {
    "USD".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Banner {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub h: Option<u32>,
    #[serde(default)]
    pub pos: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cat: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct App {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ua: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo: Option<Geo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub devicetype: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ifa: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Geo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyeruid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<serde_json::Value>,
}

/// OpenRTB Bid Response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidResponse {
    pub id: String,
    #[serde(default)]
    pub seatbid: Vec<SeatBid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bidid: Option<String>,
    #[serde(default = "default_cur")]
    pub cur: String,
    /// No-bid reason code; 2 = invalid request / timeout.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub nbr: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<serde_json::Value>,
}

fn default_cur() -> String {
    "USD".to_string()
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

/// No-bid reason: the request could not be served within constraints.
pub const NBR_INVALID_REQUEST: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatBid {
    pub bid: Vec<Bid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seat: Option<String>,
    #[serde(default)]
    pub group: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bid {
    pub id: String,
    pub impid: String,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nurl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iurl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crid: Option<String>,
    #[serde(default)]
    pub adomain: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<serde_json::Value>,
}

impl BidResponse {
    /// Create a no-bid response for the given request ID with reason code 2.
    pub fn no_bid(request_id: String) -> Self {
        Self {
            id: request_id,
            seatbid: Vec::new(),
            bidid: Some(uuid::Uuid::new_v4().to_string()),
            cur: "USD".to_string(),
            nbr: NBR_INVALID_REQUEST,
            ext: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bid_request() -> BidRequest {
        BidRequest {
            id: "req-001".to_string(),
            imp: vec![Impression {
                id: "imp-1".to_string(),
                banner: Some(Banner {
                    w: Some(300),
                    h: Some(250),
                    pos: 1,
                }),
                bidfloor: 0.5,
                bidfloorcur: "USD".to_string(),
                ext: None,
            }],
            site: Some(Site {
                id: Some("site-1".to_string()),
                domain: Some("example.com".to_string()),
                cat: Some(vec!["IAB1".to_string()]),
                page: None,
            }),
            app: None,
            device: Some(Device {
                ua: Some("Mozilla/5.0".to_string()),
                ip: Some("203.0.113.1".to_string()),
                geo: Some(Geo {
                    lat: None,
                    lon: None,
                    country: Some("US".to_string()),
                    region: None,
                    city: None,
                }),
                devicetype: Some(1),
                os: None,
                ifa: None,
            }),
            user: Some(User {
                id: Some("user-12345".to_string()),
                buyeruid: None,
                keywords: None,
                ext: None,
            }),
            tmax: 100,
            at: 2,
            cur: vec!["USD".to_string()],
            ext: None,
        }
    }

    #[test]
    fn test_bid_request_roundtrip() {
        let request = sample_bid_request();
        let json = serde_json::to_string(&request).unwrap();
        let parsed: BidRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, "req-001");
        assert_eq!(parsed.imp[0].bidfloor, 0.5);
        assert_eq!(parsed.country(), Some("US"));
        assert_eq!(parsed.device_type(), Some(1));
        assert_eq!(parsed.user_id(), Some("user-12345"));
        assert!(parsed.has_site_category());
    }

    #[test]
    fn test_no_bid_response_carries_reason_code() {
        let response = BidResponse::no_bid("req-001".to_string());
        assert_eq!(response.nbr, NBR_INVALID_REQUEST);
        assert!(response.seatbid.is_empty());

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"nbr\":2"));
    }

    #[test]
    fn test_winning_response_omits_nbr() {
        let response = BidResponse {
            id: "req-001".to_string(),
            seatbid: vec![SeatBid {
                bid: vec![Bid {
                    id: "bid-1".to_string(),
                    impid: "imp-1".to_string(),
                    price: 1.01,
                    adid: None,
                    nurl: None,
                    iurl: None,
                    cid: None,
                    crid: None,
                    adomain: Vec::new(),
                    ext: None,
                }],
                seat: Some("adserve".to_string()),
                group: 0,
            }],
            bidid: Some("bidid-1".to_string()),
            cur: "USD".to_string(),
            nbr: 0,
            ext: None,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("nbr"));
        assert!(json.contains("\"price\":1.01"));
    }

    #[test]
    fn test_empty_user_id_reads_as_anonymous() {
        let mut request = sample_bid_request();
        request.user.as_mut().unwrap().id = Some(String::new());
        assert_eq!(request.user_id(), None);
    }
}
