//! Default handler for numerics without a table entry.

use crate::colors::FormattedStringExt;
use crate::event::DisplayLine;
use crate::session::Session;

use super::{Ctx, Flow};

/// Print the concatenated parameters on the server buffer. The first
/// parameter (our nick) is dropped when it matches, as servers prefix
/// every numeric with the client nick. Formatting codes are stripped;
/// numerics have no table entry granting `decode_color`.
pub(super) fn default_numeric(session: &mut Session, ctx: &Ctx<'_>) -> Flow {
    let params: &[String] = match (ctx.msg.params.first(), &session.state.nick) {
        (Some(first), Some(own)) if session.state.casemapping.eq(first, own) => {
            &ctx.msg.params[1..]
        }
        _ => &ctx.msg.params[..],
    };
    if params.is_empty() {
        return Flow::Ok;
    }
    let text = params.join(" ");
    let text = if text.is_formatted() {
        text.strip_formatting()
    } else {
        text
    };
    session.display(DisplayLine::server(text));
    Flow::Ok
}
