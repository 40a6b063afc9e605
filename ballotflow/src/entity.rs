use crate::*;
use ed25519_dalek::PublicKey;
use indexmap::IndexMap;
use log::info;

/// Text keyed by language, with a "default" entry
pub type MultiLanguage = IndexMap<String, String>;

pub fn default_text(text: &str) -> MultiLanguage {
    let mut ml = IndexMap::new();
    ml.insert("default".to_string(), text.to_string());
    ml
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct EntityMedia {
    pub avatar: String,
    pub header: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EntityAction {
    #[serde(rename = "type")]
    pub action_type: String,
    pub name: MultiLanguage,
    pub url: String,
}

/// Descriptive metadata of an entity.
///
/// Metadata is only ever replaced as a whole; publishing a new version
/// yields a new locator.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EntityMetadata {
    pub version: String,
    pub languages: Vec<String>,
    pub name: MultiLanguage,
    pub description: MultiLanguage,
    pub media: EntityMedia,
    pub actions: Vec<EntityAction>,
}

impl Default for EntityMetadata {
    fn default() -> Self {
        EntityMetadata {
            version: "1.0".to_string(),
            languages: vec!["default".to_string()],
            name: default_text(""),
            description: default_text(""),
            media: EntityMedia::default(),
            actions: vec![],
        }
    }
}

impl EntityMetadata {
    /// Content address of the metadata document
    pub fn locator(&self) -> Result<String, Error> {
        let json = serde_json::to_vec(self)?;
        Ok(format!("mem://entity/{}", hex::encode(sha256(&[&json[..]]))))
    }
}

/// Request to replace an entity's metadata
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EntityUpdate {
    pub address: Address,
    pub metadata: EntityMetadata,

    #[serde(with = "EdPublicKeyHex")]
    pub public_key: PublicKey,
}

impl Signable for EntityUpdate {
    fn public(&self) -> PublicKey {
        self.public_key
    }
}

/// Publish the entity metadata under the identity's address, returning its locator
pub async fn register_entity<G, I>(
    gateway: &G,
    identity: &I,
    key: KeyRef,
    metadata: EntityMetadata,
) -> Result<String, Error>
where
    G: NetworkGateway + ?Sized,
    I: IdentityProvider + ?Sized,
{
    let address = identity.address(key)?;
    let update = EntityUpdate {
        address,
        metadata,
        public_key: identity.public_key(key)?,
    };
    let update = Signed::sign(identity, key, update)?;

    info!("Setting the entity metadata for {}", address);
    let locator = gateway.entity_update(update).await?;
    info!("Entity {} defined at {}", EntityId::from_address(&address), locator);

    Ok(locator)
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_locator_follows_content() {
        let mut metadata = EntityMetadata::default();
        metadata.name = default_text("Riverside");
        let first = metadata.locator().unwrap();
        assert_eq!(first, metadata.clone().locator().unwrap());

        metadata.description = default_text("Participation channel of the city council");
        assert_ne!(first, metadata.locator().unwrap());
    }
}
