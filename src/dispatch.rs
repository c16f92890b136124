use std::sync::Weak;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::cell::CellBody;
use crate::message::Message;

/// Drive one cell's mailbox. Messages for a single cell are applied
/// in arrival order, one at a time; pumps for different cells run in
/// parallel on the runtime's workers. The pump holds only a weak
/// reference, so dropping the last external handle ends it.
pub(crate) fn pump<T>(body: Weak<CellBody<T>>, mut mailbox: UnboundedReceiver<Message<T>>)
where
	T: Clone + Send + Sync + 'static,
{
	tokio::spawn(async move {
		while let Some(message) = mailbox.recv().await {
			let Some(body) = body.upgrade() else {
				break;
			};
			body.handle(message);
		}
	});
}
