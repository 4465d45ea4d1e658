//! Protocolo da ponte BLE → UDP.
//!
//! Uma ponte (ESP32 com WiFi, ou o emulador) repassa anúncios e
//! notificações GATT como datagramas UDP. Formato do datagrama:
//!
//! ```text
//! ┌──────────┬─────────┬─────────┬──────────────┐
//! │ Magic(1) │ Ver.(1) │ Tipo(1) │ Payload (N)  │
//! └──────────┴─────────┴─────────┴──────────────┘
//! ```
//!
//! - Magic byte `0x41` ('A') identifica pacote Aeroband
//! - Versão do protocolo (1 byte)
//! - Tipo: `0x01` anúncio, `0x02` notificação, `0x03` desconexão
//! - Anúncio: `nome\nserviço\ncharacteristic` em UTF-8
//! - Notificação: bytes brutos da characteristic (um pacote BLE)

/// Magic byte que identifica pacotes da ponte.
pub const MAGIC_BYTE: u8 = 0x41; // 'A'

/// Versão atual do protocolo.
pub const PROTOCOL_VERSION: u8 = 1;

/// Tamanho do header (magic + versão + tipo).
const HEADER_SIZE: usize = 3;

/// Tamanho máximo de datagrama aceito.
pub const MAX_DATAGRAM: usize = 2048;

const KIND_ADVERT: u8 = 0x01;
const KIND_NOTIFY: u8 = 0x02;
const KIND_BYE: u8 = 0x03;

/// Anúncio de um periférico com sua tabela GATT mínima.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advert {
    pub name: String,
    pub service_uuid: String,
    pub characteristic_uuid: String,
}

/// Datagrama decodificado.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram {
    Advert(Advert),
    Notify(Vec<u8>),
    Bye,
}

/// Erros do protocolo.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Pacote muito curto ({0} bytes, mínimo {HEADER_SIZE})")]
    TooShort(usize),

    #[error("Magic byte inválido: 0x{0:02X} (esperado 0x{MAGIC_BYTE:02X})")]
    InvalidMagic(u8),

    #[error("Versão incompatível: {0} (suportada: {PROTOCOL_VERSION})")]
    VersionMismatch(u8),

    #[error("Tipo de datagrama desconhecido: 0x{0:02X}")]
    UnknownKind(u8),

    #[error("Anúncio malformado: {0}")]
    BadAdvert(String),

    #[error("Datagrama excede {MAX_DATAGRAM} bytes ({0})")]
    TooLarge(usize),
}

/// Codifica um [`Datagram`] para envio UDP.
///
/// Retorna bytes no formato: `[MAGIC][VERSION][KIND][payload...]`
pub fn encode_datagram(datagram: &Datagram) -> Result<Vec<u8>, ProtocolError> {
    let (kind, body): (u8, Vec<u8>) = match datagram {
        Datagram::Advert(ad) => {
            for field in [&ad.name, &ad.service_uuid, &ad.characteristic_uuid] {
                if field.contains('\n') {
                    return Err(ProtocolError::BadAdvert(format!("campo com newline: {field:?}")));
                }
            }
            let text = format!("{}\n{}\n{}", ad.name, ad.service_uuid, ad.characteristic_uuid);
            (KIND_ADVERT, text.into_bytes())
        }
        Datagram::Notify(bytes) => (KIND_NOTIFY, bytes.clone()),
        Datagram::Bye => (KIND_BYE, Vec::new()),
    };

    let total = HEADER_SIZE + body.len();
    if total > MAX_DATAGRAM {
        return Err(ProtocolError::TooLarge(total));
    }

    let mut frame = Vec::with_capacity(total);
    frame.push(MAGIC_BYTE);
    frame.push(PROTOCOL_VERSION);
    frame.push(kind);
    frame.extend_from_slice(&body);

    Ok(frame)
}

/// Decodifica bytes recebidos via UDP em [`Datagram`].
///
/// Valida magic byte e versão antes de interpretar o payload.
pub fn decode_datagram(data: &[u8]) -> Result<Datagram, ProtocolError> {
    if data.len() < HEADER_SIZE {
        return Err(ProtocolError::TooShort(data.len()));
    }

    let magic = data[0];
    if magic != MAGIC_BYTE {
        return Err(ProtocolError::InvalidMagic(magic));
    }

    let version = data[1];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch(version));
    }

    let payload = &data[HEADER_SIZE..];
    match data[2] {
        KIND_ADVERT => decode_advert(payload).map(Datagram::Advert),
        KIND_NOTIFY => Ok(Datagram::Notify(payload.to_vec())),
        KIND_BYE => Ok(Datagram::Bye),
        other => Err(ProtocolError::UnknownKind(other)),
    }
}

fn decode_advert(payload: &[u8]) -> Result<Advert, ProtocolError> {
    let text = std::str::from_utf8(payload).map_err(|e| ProtocolError::BadAdvert(e.to_string()))?;
    let mut parts = text.split('\n');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(name), Some(service), Some(characteristic), None) => Ok(Advert {
            name: name.to_string(),
            service_uuid: service.to_ascii_lowercase(),
            characteristic_uuid: characteristic.to_ascii_lowercase(),
        }),
        _ => Err(ProtocolError::BadAdvert(format!("esperado 3 campos: {text:?}"))),
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
