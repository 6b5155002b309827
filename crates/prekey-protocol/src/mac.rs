//! MAC constructions for every MAC-bearing message, plus the session MAC
//! key derivation from the DAKE shared point.

use curve25519_dalek::edwards::EdwardsPoint;
use prekey_crypto::kdf::{kdf, kdf_into, Usage, MAC_LEN, SHARED_SECRET_LEN};
use prekey_crypto::keys::encode_point;

use crate::error::ProtocolError;
use crate::message::{
    MSG_FAILURE, MSG_PUBLICATION, MSG_STORAGE_INFO_REQUEST, MSG_STORAGE_STATUS, MSG_SUCCESS,
};
use crate::profile::{ClientProfile, PrekeyMessage, PrekeyProfile};

pub type Mac = [u8; MAC_LEN];
pub type MacKey = [u8; MAC_LEN];

fn derive(usage: Usage, values: &[&[u8]]) -> Mac {
    let mut out = [0u8; MAC_LEN];
    kdf_into(usage, values, &mut out);
    out
}

/// `KDF(PreMacKey, KDF(SK, encode(shared)))`.
pub fn mac_key(shared: &EdwardsPoint) -> MacKey {
    let mut sk = [0u8; SHARED_SECRET_LEN];
    kdf_into(Usage::SharedSecret, &[&encode_point(shared)], &mut sk);
    let key = derive(Usage::PreMacKey, &[&sk]);
    sk.fill(0);
    key
}

pub fn storage_info_mac(mac_key: &MacKey) -> Mac {
    derive(Usage::StorageInfoMac, &[mac_key, &[MSG_STORAGE_INFO_REQUEST]])
}

pub fn storage_status_mac(mac_key: &MacKey, instance_tag: u32, number: u32) -> Mac {
    derive(
        Usage::StatusMac,
        &[
            mac_key,
            &[MSG_STORAGE_STATUS],
            &instance_tag.to_be_bytes(),
            &number.to_be_bytes(),
        ],
    )
}

pub fn success_mac(mac_key: &MacKey, instance_tag: u32) -> Mac {
    derive(
        Usage::SuccessMac,
        &[mac_key, &[MSG_SUCCESS], &instance_tag.to_be_bytes()],
    )
}

pub fn failure_mac(mac_key: &MacKey, instance_tag: u32) -> Mac {
    derive(
        Usage::FailureMac,
        &[mac_key, &[MSG_FAILURE], &instance_tag.to_be_bytes()],
    )
}

fn count_byte(count: usize) -> Result<u8, ProtocolError> {
    u8::try_from(count).map_err(|_| {
        ProtocolError::Serialization(format!("{count} elements do not fit in a count byte"))
    })
}

/// MAC over a publication's contents. Absent profiles contribute no hash,
/// only their zero count.
pub fn publication_mac(
    mac_key: &MacKey,
    prekey_messages: &[PrekeyMessage],
    client_profile: Option<&ClientProfile>,
    prekey_profile: Option<&PrekeyProfile>,
) -> Result<Mac, ProtocolError> {
    let mut messages = Vec::new();
    for message in prekey_messages {
        messages.extend_from_slice(&message.to_bytes()?);
    }
    let messages_hash = kdf(Usage::PrekeyMessage, MAC_LEN, &[&messages]);

    let client_profile_hash = match client_profile {
        Some(profile) => kdf(Usage::ClientProfile, MAC_LEN, &[&profile.to_bytes()?]),
        None => Vec::new(),
    };
    let prekey_profile_hash = match prekey_profile {
        Some(profile) => kdf(Usage::PrekeyProfile, MAC_LEN, &[&profile.to_bytes()?]),
        None => Vec::new(),
    };

    Ok(derive(
        Usage::PreMac,
        &[
            mac_key,
            &[MSG_PUBLICATION],
            &[count_byte(prekey_messages.len())?],
            &messages_hash,
            &[u8::from(client_profile.is_some())],
            &client_profile_hash,
            &[u8::from(prekey_profile.is_some())],
            &prekey_profile_hash,
        ],
    ))
}
