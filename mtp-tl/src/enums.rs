//! Boxed types.
//!
//! Each enum reads a constructor id and decodes the matching variant; an id
//! that belongs to none of them yields [`crate::deserialize::Error::BadTypeId`].

use crate::types;

tl_enum! {
    pub enum ResPq {
        ResPq(types::ResPq),
    }
}

tl_enum! {
    pub enum PQInnerData {
        PQInnerData(types::PQInnerData),
        Dc(types::PQInnerDataDc),
    }
}

tl_enum! {
    pub enum ServerDhParams {
        Fail(types::ServerDhParamsFail),
        Ok(types::ServerDhParamsOk),
    }
}

tl_enum! {
    pub enum ServerDhInnerData {
        ServerDhInnerData(types::ServerDhInnerData),
    }
}

tl_enum! {
    pub enum ClientDhInnerData {
        ClientDhInnerData(types::ClientDhInnerData),
    }
}

tl_enum! {
    pub enum SetClientDhParamsAnswer {
        DhGenOk(types::DhGenOk),
        DhGenRetry(types::DhGenRetry),
        DhGenFail(types::DhGenFail),
    }
}

tl_enum! {
    pub enum Pong {
        Pong(types::Pong),
    }
}

tl_enum! {
    pub enum BadMsgNotification {
        Notification(types::BadMsgNotification),
        BadServerSalt(types::BadServerSalt),
    }
}

tl_enum! {
    pub enum MsgDetailedInfo {
        Info(types::MsgDetailedInfo),
        New(types::MsgNewDetailedInfo),
    }
}

tl_enum! {
    pub enum FutureSalts {
        FutureSalts(types::FutureSalts),
    }
}

tl_enum! {
    pub enum DestroySessionRes {
        Ok(types::DestroySessionOk),
        None(types::DestroySessionNone),
    }
}

tl_enum! {
    pub enum DcOption {
        DcOption(types::DcOption),
    }
}

tl_enum! {
    pub enum Config {
        Config(types::Config),
    }
}

pub mod auth {
    use crate::types;

    tl_enum! {
        pub enum ExportedAuthorization {
            ExportedAuthorization(types::auth::ExportedAuthorization),
        }
    }
}
