pub mod dake;
pub mod envelope;
pub mod error;
pub mod fragment;
pub mod mac;
pub mod message;
pub mod profile;
pub mod wire;

pub use dake::DakeContext;
pub use error::ProtocolError;
pub use fragment::{Fragment, Reassembly};
pub use mac::{Mac, MacKey};
pub use message::{
    Dake1, Dake2, Dake3, Dake3Payload, EnsembleRetrieval, EnsembleRetrievalQuery, Failure, Message,
    NoPrekeyEnsembles, Publication, StorageInformationRequest, StorageStatus, Success,
};
pub use profile::{ClientProfile, PrekeyEnsemble, PrekeyMessage, PrekeyProfile};
