//! IPC entry point of the service.
//!
//! Requests are decoded into [`RdbRequest`] and dispatched to
//! [`RdbServiceImpl`]. Every reply starts with an [`RdbStatus`] code except
//! `OBTAIN_TABLE`, which replies with the table name alone.

use std::sync::Arc;

use rdbsync_ipc::{
    CallingIdentity, LocalObject, Parcel, ParcelResult, RemoteStub, ERR_INTERFACE_TOKEN,
    ERR_INVALID_DATA,
};
use rdbsync_protocol::{RdbRequest, RdbServiceCode, RdbStatus, SERVICE_DESCRIPTOR};
use rdbsync_store::DbStatus;
use tracing::{debug, warn};

use crate::error::ServiceResult;
use crate::result_set_stub::RdbResultSetStub;
use crate::service::RdbServiceImpl;

/// Stub dispatching parcels to the service.
pub struct RdbServiceStub {
    service: Arc<RdbServiceImpl>,
}

impl RdbServiceStub {
    /// Serves `service`.
    pub fn new(service: Arc<RdbServiceImpl>) -> Self {
        Self { service }
    }

    /// The served service.
    pub fn service(&self) -> &Arc<RdbServiceImpl> {
        &self.service
    }

    fn dispatch(&self, request: RdbRequest, reply: &mut Parcel, caller: &CallingIdentity) -> ParcelResult<()> {
        let code = request.code();
        let service = &self.service;
        match request {
            RdbRequest::ObtainTable { device, table } => {
                reply.write_string(&service.obtain_distributed_table_name(&device, &table))
            }
            RdbRequest::InitNotifier { param, notifier } => {
                write_status(reply, code, service.init_notifier(caller, &param, notifier))
            }
            RdbRequest::SetDistributedTables { param, tables } => write_status(
                reply,
                code,
                service.set_distributed_tables(caller, &param, &tables),
            ),
            RdbRequest::Sync {
                param,
                option,
                predicates,
            } => match service.do_sync(caller, &param, &option, &predicates) {
                Ok(result) => {
                    reply.write_i32(RdbStatus::Ok.code())?;
                    reply.write(&result)
                }
                Err(err) => {
                    warn!(pid = caller.pid, ?code, error = %err, "request failed");
                    reply.write_i32(err.status().code())
                }
            },
            RdbRequest::Async {
                param,
                seq_num,
                option,
                predicates,
            } => write_status(
                reply,
                code,
                service.do_async(caller, &param, seq_num, &option, &predicates),
            ),
            RdbRequest::Subscribe { param } => {
                write_status(reply, code, service.do_subscribe(caller, &param))
            }
            RdbRequest::Unsubscribe { param } => {
                write_status(reply, code, service.do_unsubscribe(caller, &param))
            }
            RdbRequest::RemoteQuery {
                param,
                device,
                sql,
                selection_args,
            } => match service.remote_query(caller, &param, &device, &sql, &selection_args) {
                Ok(result_set) => {
                    let object = LocalObject::new(Arc::new(RdbResultSetStub::new(result_set)), *caller);
                    reply.write_i32(RdbStatus::Ok.code())?;
                    reply.write_remote_object(Some(&object.into_ref()))
                }
                Err(err) => {
                    warn!(pid = caller.pid, ?code, error = %err, "request failed");
                    let engine = err.engine_status().unwrap_or(DbStatus::DbError);
                    reply.write_i32(err.status().code())?;
                    reply.write_i32(engine.code())
                }
            },
            RdbRequest::CreateRdbTable {
                param,
                write_permission,
                read_permission,
            } => write_status(
                reply,
                code,
                service.create_rdb_table(caller, &param, &write_permission, &read_permission),
            ),
            RdbRequest::DestroyRdbTable { param } => {
                write_status(reply, code, service.destroy_rdb_table(caller, &param))
            }
        }
    }
}

impl RemoteStub for RdbServiceStub {
    fn descriptor(&self) -> &str {
        SERVICE_DESCRIPTOR
    }

    fn on_remote_request(
        &self,
        code: u32,
        data: &mut Parcel,
        reply: &mut Parcel,
        caller: &CallingIdentity,
    ) -> i32 {
        if let Err(err) = data.enforce_interface(SERVICE_DESCRIPTOR) {
            warn!(pid = caller.pid, code, error = %err, "bad interface token");
            return ERR_INTERFACE_TOKEN;
        }
        let written = match RdbServiceCode::from_code(code) {
            None => {
                warn!(pid = caller.pid, code, "unknown command");
                reply.write_i32(RdbStatus::NotSupported.code())
            }
            Some(code) => match RdbRequest::decode(code, data) {
                Ok(request) => {
                    debug!(pid = caller.pid, ?request, "request");
                    self.dispatch(request, reply, caller)
                }
                Err(err) => {
                    warn!(pid = caller.pid, ?code, error = %err, "undecodable request");
                    reply.write_i32(RdbStatus::Error.code())
                }
            },
        };
        match written {
            Ok(()) => 0,
            Err(err) => {
                warn!(pid = caller.pid, error = %err, "failed to write reply");
                ERR_INVALID_DATA
            }
        }
    }
}

fn write_status(reply: &mut Parcel, code: RdbServiceCode, outcome: ServiceResult<()>) -> ParcelResult<()> {
    let status = match outcome {
        Ok(()) => RdbStatus::Ok,
        Err(err) => {
            warn!(?code, error = %err, "request failed");
            err.status()
        }
    };
    reply.write_i32(status.code())
}
