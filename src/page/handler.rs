// Bus-side dispatch: decodes `action` + body, calls the service, replies once.
use serde_json::Value;
use std::sync::Arc;

use super::{
    ACTION_HEADER, Action, CreateParams, IdParams, NameParams, PageService, SaveParams,
    decode_params, found_json, to_json,
};
use crate::bus::{EventBus, Message, ReplyFailure, ServiceRegistration};
use crate::core::error::{Error, ErrorKind};

/// Registers `service` at `address`. Callers anywhere on the bus reach it
/// through [`super::PageServiceClient`].
pub fn register(bus: &EventBus, address: &str, service: Arc<PageService>) -> ServiceRegistration {
    tracing::info!(address, "page service registered");
    ServiceRegistration::spawn(bus.consumer(address), move |message| {
        let service = Arc::clone(&service);
        async move { handle(&service, message).await }
    })
}

async fn handle(service: &PageService, mut message: Message) {
    match dispatch(service, &mut message).await {
        Ok(body) => {
            message.reply(body);
        }
        Err(err) => {
            tracing::debug!(address = message.address(), error = %err, "page request failed");
            message.fail(ReplyFailure::from(&err));
        }
    }
}

async fn dispatch(service: &PageService, message: &mut Message) -> Result<Value, Error> {
    let action = match message.header(ACTION_HEADER) {
        Some(name) => Action::parse(name).ok_or_else(|| {
            Error::new(ErrorKind::Usage).with_message(format!("unknown action {name}"))
        })?,
        None => {
            return Err(Error::new(ErrorKind::Usage).with_message("missing action header"));
        }
    };
    let body = message.take_body();

    match action {
        Action::FetchAllPages => to_json(service.fetch_all_pages().await?),
        Action::FetchAllPagesData => to_json(service.fetch_all_pages_data().await?),
        Action::FetchPage => {
            let params: NameParams = decode_params(action, body)?;
            found_json(service.fetch_page(&params.name).await?)
        }
        Action::FetchPageById => {
            let params: IdParams = decode_params(action, body)?;
            found_json(service.fetch_page_by_id(params.id).await?)
        }
        Action::CreatePage => {
            let params: CreateParams = decode_params(action, body)?;
            service.create_page(&params.name, &params.content).await?;
            Ok(Value::Null)
        }
        Action::SavePage => {
            let params: SaveParams = decode_params(action, body)?;
            service.save_page(params.id, &params.content).await?;
            Ok(Value::Null)
        }
        Action::DeletePage => {
            let params: IdParams = decode_params(action, body)?;
            service.delete_page(params.id).await?;
            Ok(Value::Null)
        }
    }
}
