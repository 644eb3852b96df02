//! ONVIF 摄像头客户端（SOAP over HTTP）。
//!
//! 每次调用先经 `GetCapabilities` 发现服务地址，再调用目标服务，不在调用之间缓存会话。

use crate::soap::{self, Element};
use crate::{DateTimeSetting, DeviceControl, DeviceError, Preset, Profile};
use async_trait::async_trait;
use chrono::{Datelike, Timelike};
use domain::{MoveVector, PresetToken};
use quick_xml::escape::escape;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::debug;

/// 云台固定移动速度（0~1）。
const MOVE_SPEED: f64 = 0.5;

/// 快照下载超时。
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);

const SPACE_PAN_TILT_TRANSLATION: &str =
    "http://www.onvif.org/ver10/tptz/PanTiltSpaces/TranslationGenericSpace";
const SPACE_ZOOM_TRANSLATION: &str =
    "http://www.onvif.org/ver10/tptz/ZoomSpaces/TranslationGenericSpace";
const SPACE_PAN_TILT_SPEED: &str = "http://www.onvif.org/ver10/tptz/PanTiltSpaces/GenericSpeedSpace";
const SPACE_ZOOM_SPEED: &str = "http://www.onvif.org/ver10/tptz/ZoomSpaces/ZoomGenericSpeedSpace";

/// 摄像头连接参数。
#[derive(Debug, Clone)]
pub struct OnvifConfig {
    /// `host:port`，如 `192.168.1.64:80`
    pub addr: String,
    pub username: String,
    pub password: String,
}

/// 服务地址。
#[derive(Debug, Clone)]
struct Services {
    device: String,
    media: String,
    ptz: Option<String>,
}

/// ONVIF 摄像头。
#[derive(Debug, Clone)]
pub struct OnvifCamera {
    client: reqwest::Client,
    config: OnvifConfig,
}

impl OnvifCamera {
    pub fn new(config: OnvifConfig) -> Result<Self, DeviceError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| DeviceError::Transport(err.to_string()))?;
        Ok(Self { client, config })
    }

    fn device_service_url(&self) -> String {
        let addr = self.config.addr.trim_end_matches('/');
        if addr.contains("://") {
            format!("{}/onvif/device_service", addr)
        } else {
            format!("http://{}/onvif/device_service", addr)
        }
    }

    async fn call(&self, url: &str, body: &str) -> Result<Element, DeviceError> {
        let envelope = soap::envelope(&self.config.username, &self.config.password, body);
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/soap+xml; charset=utf-8")
            .body(envelope)
            .send()
            .await
            .map_err(|err| DeviceError::Transport(err.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| DeviceError::Transport(err.to_string()))?;
        let document = match Element::parse(&text) {
            Ok(document) => document,
            Err(_) if !status.is_success() => return Err(DeviceError::Status(status.as_u16())),
            Err(err) => return Err(err),
        };
        if let Some(fault) = soap::fault(&document) {
            return Err(fault);
        }
        if !status.is_success() {
            return Err(DeviceError::Status(status.as_u16()));
        }
        document
            .find("Body")
            .cloned()
            .ok_or_else(|| DeviceError::Parse("missing soap body".to_string()))
    }

    async fn services(&self) -> Result<Services, DeviceError> {
        let device = self.device_service_url();
        let body = self
            .call(
                &device,
                "<tds:GetCapabilities><tds:Category>All</tds:Category></tds:GetCapabilities>",
            )
            .await?;
        let media = body
            .path_text(&["Media", "XAddr"])
            .ok_or_else(|| DeviceError::Unsupported("media".to_string()))?
            .to_string();
        let ptz = body.path_text(&["PTZ", "XAddr"]).map(str::to_string);
        let device = body
            .path_text(&["Device", "XAddr"])
            .map(str::to_string)
            .unwrap_or(device);
        Ok(Services { device, media, ptz })
    }

    async fn ptz_call(&self, body: &str) -> Result<Element, DeviceError> {
        let services = self.services().await?;
        let ptz = services
            .ptz
            .ok_or_else(|| DeviceError::Unsupported("ptz".to_string()))?;
        self.call(&ptz, body).await
    }
}

#[async_trait]
impl DeviceControl for OnvifCamera {
    async fn get_profiles(&self) -> Result<Profile, DeviceError> {
        let services = self.services().await?;
        let body = self.call(&services.media, "<trt:GetProfiles/>").await?;
        let profile = body
            .find("Profiles")
            .ok_or_else(|| DeviceError::Parse("no media profile".to_string()))?;
        let token = profile
            .attribute("token")
            .ok_or_else(|| DeviceError::Parse("profile without token".to_string()))?;
        Ok(Profile {
            token: token.to_string(),
            name: profile
                .child("Name")
                .map(|name| name.text.clone())
                .unwrap_or_default(),
        })
    }

    async fn relative_move(
        &self,
        vector: MoveVector,
        angle: f64,
        profile_token: &str,
    ) -> Result<(), DeviceError> {
        self.ptz_call(&relative_move_body(vector, angle, profile_token))
            .await?;
        Ok(())
    }

    async fn get_snapshot_uri(&self, profile_token: &str) -> Result<String, DeviceError> {
        let services = self.services().await?;
        let body = self
            .call(
                &services.media,
                &format!(
                    "<trt:GetSnapshotUri><trt:ProfileToken>{}</trt:ProfileToken></trt:GetSnapshotUri>",
                    escape(profile_token)
                ),
            )
            .await?;
        body.path_text(&["MediaUri", "Uri"])
            .map(str::to_string)
            .ok_or_else(|| DeviceError::Parse("missing snapshot uri".to_string()))
    }

    async fn fetch_snapshot(&self, uri: &str) -> Result<Vec<u8>, DeviceError> {
        let response = self
            .client
            .get(uri)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .timeout(SNAPSHOT_TIMEOUT)
            .send()
            .await
            .map_err(|err| DeviceError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeviceError::Status(status.as_u16()));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| DeviceError::Transport(err.to_string()))?;
        debug!(target: "bridge.device", uri = %uri, size = bytes.len(), "snapshot_fetched");
        Ok(bytes.to_vec())
    }

    async fn set_preset(
        &self,
        profile_token: &str,
        preset: &PresetToken,
    ) -> Result<String, DeviceError> {
        let body = self
            .ptz_call(&format!(
                concat!(
                    "<tptz:SetPreset><tptz:ProfileToken>{}</tptz:ProfileToken>",
                    "<tptz:PresetName>{}</tptz:PresetName>",
                    "<tptz:PresetToken>{}</tptz:PresetToken></tptz:SetPreset>"
                ),
                escape(profile_token),
                escape(&preset.display_name()),
                escape(preset.as_str()),
            ))
            .await?;
        Ok(body
            .path_text(&["SetPresetResponse", "PresetToken"])
            .unwrap_or(preset.as_str())
            .to_string())
    }

    async fn get_presets(&self, profile_token: &str) -> Result<Vec<Preset>, DeviceError> {
        let body = self
            .ptz_call(&format!(
                "<tptz:GetPresets><tptz:ProfileToken>{}</tptz:ProfileToken></tptz:GetPresets>",
                escape(profile_token)
            ))
            .await?;
        let mut elements = Vec::new();
        body.find_all("Preset", &mut elements);
        Ok(elements
            .into_iter()
            .map(|preset| Preset {
                token: preset.attribute("token").unwrap_or_default().to_string(),
                name: preset
                    .child("Name")
                    .map(|name| name.text.clone())
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn goto_preset(
        &self,
        profile_token: &str,
        preset: &PresetToken,
    ) -> Result<(), DeviceError> {
        self.ptz_call(&format!(
            concat!(
                "<tptz:GotoPreset><tptz:ProfileToken>{}</tptz:ProfileToken>",
                "<tptz:PresetToken>{}</tptz:PresetToken>{}</tptz:GotoPreset>"
            ),
            escape(profile_token),
            escape(preset.as_str()),
            speed_element(),
        ))
        .await?;
        Ok(())
    }

    async fn remove_preset(
        &self,
        profile_token: &str,
        preset: &PresetToken,
    ) -> Result<(), DeviceError> {
        self.ptz_call(&format!(
            concat!(
                "<tptz:RemovePreset><tptz:ProfileToken>{}</tptz:ProfileToken>",
                "<tptz:PresetToken>{}</tptz:PresetToken></tptz:RemovePreset>"
            ),
            escape(profile_token),
            escape(preset.as_str()),
        ))
        .await?;
        Ok(())
    }

    async fn set_home_position(&self, profile_token: &str) -> Result<(), DeviceError> {
        self.ptz_call(&format!(
            "<tptz:SetHomePosition><tptz:ProfileToken>{}</tptz:ProfileToken></tptz:SetHomePosition>",
            escape(profile_token)
        ))
        .await?;
        Ok(())
    }

    async fn goto_home_position(&self, profile_token: &str) -> Result<(), DeviceError> {
        self.ptz_call(&format!(
            "<tptz:GotoHomePosition><tptz:ProfileToken>{}</tptz:ProfileToken>{}</tptz:GotoHomePosition>",
            escape(profile_token),
            speed_element(),
        ))
        .await?;
        Ok(())
    }

    async fn set_system_date_and_time(&self, setting: &DateTimeSetting) -> Result<(), DeviceError> {
        let services = self.services().await?;
        self.call(&services.device, &date_time_body(setting)).await?;
        Ok(())
    }

    async fn probe(&self) -> Result<(), DeviceError> {
        self.services().await.map(|_| ())
    }
}

/// 每个方向轴的位移为 `±0.5 * angle`。
fn relative_move_body(vector: MoveVector, angle: f64, profile_token: &str) -> String {
    let displacement = 0.5 * angle;
    let x = f64::from(vector.left_right.signum()) * displacement;
    let y = f64::from(vector.up_down.signum()) * displacement;
    let z = f64::from(vector.zoom.signum()) * displacement;
    format!(
        concat!(
            "<tptz:RelativeMove><tptz:ProfileToken>{token}</tptz:ProfileToken>",
            "<tptz:Translation>",
            r#"<tt:PanTilt x="{x}" y="{y}" space="{pt_space}"/>"#,
            r#"<tt:Zoom x="{z}" space="{zoom_space}"/>"#,
            "</tptz:Translation>{speed}</tptz:RelativeMove>"
        ),
        token = escape(profile_token),
        x = x,
        y = y,
        z = z,
        pt_space = SPACE_PAN_TILT_TRANSLATION,
        zoom_space = SPACE_ZOOM_TRANSLATION,
        speed = speed_element(),
    )
}

fn speed_element() -> String {
    format!(
        concat!(
            "<tptz:Speed>",
            r#"<tt:PanTilt x="{speed}" y="{speed}" space="{pt_space}"/>"#,
            r#"<tt:Zoom x="{speed}" space="{zoom_space}"/>"#,
            "</tptz:Speed>"
        ),
        speed = MOVE_SPEED,
        pt_space = SPACE_PAN_TILT_SPEED,
        zoom_space = SPACE_ZOOM_SPEED,
    )
}

fn date_time_body(setting: &DateTimeSetting) -> String {
    let time = setting.time;
    format!(
        concat!(
            "<tds:SetSystemDateAndTime>",
            "<tds:DateTimeType>{mode}</tds:DateTimeType>",
            "<tds:DaylightSavings>{dst}</tds:DaylightSavings>",
            "<tds:TimeZone><tt:TZ>{tz}</tt:TZ></tds:TimeZone>",
            "<tds:UTCDateTime>",
            "<tt:Time><tt:Hour>{hour}</tt:Hour><tt:Minute>{minute}</tt:Minute><tt:Second>{second}</tt:Second></tt:Time>",
            "<tt:Date><tt:Year>{year}</tt:Year><tt:Month>{month}</tt:Month><tt:Day>{day}</tt:Day></tt:Date>",
            "</tds:UTCDateTime>",
            "</tds:SetSystemDateAndTime>"
        ),
        mode = setting.mode.as_str(),
        dst = setting.daylight_savings,
        tz = escape(&setting.time_zone),
        hour = time.hour(),
        minute = time.minute(),
        second = time.second(),
        year = time.year(),
        month = time.month(),
        day = time.day(),
    )
}
