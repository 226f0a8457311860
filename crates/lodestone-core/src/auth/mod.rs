//! Account authentication
//!
//! Each hop of the Microsoft → Xbox Live → XSTS → Minecraft chain has its
//! own exchanger. `AuthOrchestrator` runs them in order. All HTTP goes
//! through an `HttpTransport`.

mod microsoft;
mod mojang;
mod orchestrator;
mod transport;
mod xbox;

#[cfg(test)]
mod testing;

pub use microsoft::{
    DevicePoll, MicrosoftAuthConfig, MicrosoftToken, TokenExchangeClient, AUTHORIZE_URL,
    DEVICE_CODE_URL, TOKEN_URL,
};
pub use mojang::{
    MinecraftProfile, MinecraftToken, MojangAuthExchanger, ProfileTexture, YggdrasilProfile,
    YggdrasilSession, MINECRAFT_SERVICES_URL, YGGDRASIL_URL,
};
pub use orchestrator::{AuthOptions, AuthOrchestrator};
pub use transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, RequestBody};
pub use xbox::{XboxAuthExchanger, XboxToken, MINECRAFT_RELYING_PARTY, USER_AUTHENTICATE_URL, XSTS_AUTHORIZE_URL};
