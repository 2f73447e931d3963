use std::{
    os::fd::{AsFd, BorrowedFd},
    sync::{mpsc, Arc},
};

use futures::StreamExt;
use nix::sys::eventfd::{EfdFlags, EventFd};
use zbus::zvariant;

use crate::{
    names,
    transport::{Bus, MethodArgs, NameClaim, SignalMessage, SignalRule},
    wire::Value,
    Error, Result,
};

/// [`Bus`] on top of a zbus session connection.
///
/// The connection lives on a private single-worker tokio runtime, which reads the socket in the
/// background and queues incoming signals. Every call from the owner blocks on that runtime, so a
/// `ZbusBus` must not be used from within another tokio runtime.
pub struct ZbusBus {
    con: zbus::Connection,
    incoming: mpsc::Receiver<SignalMessage>,
    ready: Arc<EventFd>,
    pump: tokio::task::JoinHandle<()>,
    rt: tokio::runtime::Runtime,
}

impl ZbusBus {
    /// Connect to the session bus.
    pub fn session() -> Result<Self> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("notifier-bus")
            .enable_all()
            .build()
            .map_err(|e| Error::Connection(format!("failed to start bus runtime: {}", e)))?;
        let con = rt
            .block_on(zbus::Connection::session())
            .map_err(|e| Error::Connection(format!("failed to connect to the session bus: {}", e)))?;
        Self::with_connection(rt, con)
    }

    fn with_connection(rt: tokio::runtime::Runtime, con: zbus::Connection) -> Result<Self> {
        let ready = EventFd::from_value_and_flags(0, EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK)
            .map_err(|e| Error::Connection(format!("failed to create eventfd: {}", e)))?;
        let ready = Arc::new(ready);

        // created before returning so that nothing sent after a subscribe can be missed
        let stream = zbus::MessageStream::from(&con);
        let (tx, incoming) = mpsc::channel();
        let pump = rt.spawn(pump_signals(stream, tx, ready.clone()));

        Ok(Self { con, incoming, ready, pump, rt })
    }

    async fn get_property_async(&self, destination: &str, path: &str, interface: &str, property: &str) -> Result<Value> {
        let proxy = zbus::fdo::PropertiesProxy::builder(&self.con).destination(destination)?.path(path)?.build().await?;
        let interface = zbus::names::InterfaceName::try_from(interface).map_err(|e| Error::InvalidArgs(e.to_string()))?;
        let value = proxy.get(interface, property).await.map_err(|e| classify_fdo(destination, e))?;
        Ok(wire_value(&value))
    }

    async fn update_match_rule(&self, rule: &SignalRule, add: bool) -> Result<()> {
        let dbus = zbus::fdo::DBusProxy::new(&self.con).await?;
        let match_rule = match_rule(rule)?;
        let result = if add { dbus.add_match_rule(match_rule).await } else { dbus.remove_match_rule(match_rule).await };
        result.map_err(|e| classify_fdo(&rule.sender, e))
    }
}

impl Drop for ZbusBus {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn pump_signals(mut stream: zbus::MessageStream, tx: mpsc::Sender<SignalMessage>, ready: Arc<EventFd>) {
    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("error while reading from the bus: {}", e);
                continue;
            }
        };
        let Some(signal) = signal_from_message(&msg) else {
            continue;
        };
        if tx.send(signal).is_err() {
            // the owner went away
            break;
        }
        if let Err(e) = ready.write(1) {
            log::error!("failed to signal readiness: {}", e);
        }
    }
    log::debug!("bus message stream ended");
}

fn signal_from_message(msg: &zbus::Message) -> Option<SignalMessage> {
    if msg.message_type() != zbus::message::Type::Signal {
        return None;
    }
    let header = msg.header();
    Some(SignalMessage {
        sender: header.sender()?.to_string(),
        path: header.path()?.to_string(),
        interface: header.interface()?.to_string(),
        member: header.member()?.to_string(),
        arg: msg.body().deserialize::<String>().unwrap_or_default(),
    })
}

impl Bus for ZbusBus {
    fn request_name(&self, name: &str) -> Result<NameClaim> {
        let flags = [zbus::fdo::RequestNameFlags::DoNotQueue];

        use zbus::fdo::RequestNameReply::*;
        match self.rt.block_on(self.con.request_name_with_flags(name, flags.into_iter().collect())) {
            Ok(PrimaryOwner) => Ok(NameClaim::Acquired),
            // we choose to not use an existing owner
            Ok(Exists | AlreadyOwner | InQueue) | Err(zbus::Error::NameTaken) => Ok(NameClaim::Taken),
            Err(e) => Err(e.into()),
        }
    }

    fn export_host(&self) -> Result<()> {
        if self.rt.block_on(self.con.object_server().at(names::HOST_OBJECT, HostObject))? {
            Ok(())
        } else {
            Err(Error::Connection(format!("Object already exists at {} on this connection", names::HOST_OBJECT)))
        }
    }

    fn get_property(&self, destination: &str, path: &str, interface: &str, property: &str) -> Result<Value> {
        self.rt.block_on(self.get_property_async(destination, path, interface, property))
    }

    fn call_method(&self, destination: &str, path: &str, interface: &str, method: &str, args: MethodArgs) -> Result<()> {
        let con = &self.con;
        let reply = self.rt.block_on(async {
            match args {
                MethodArgs::Str(s) => con.call_method(Some(destination), path, Some(interface), method, &s.as_str()).await,
                MethodArgs::Point(x, y) => con.call_method(Some(destination), path, Some(interface), method, &(x, y)).await,
            }
        });
        reply.map(|_| ()).map_err(|e| classify(destination, e))
    }

    fn subscribe(&self, rule: &SignalRule) -> Result<()> {
        self.rt.block_on(self.update_match_rule(rule, true))
    }

    fn unsubscribe(&self, rule: &SignalRule) -> Result<()> {
        self.rt.block_on(self.update_match_rule(rule, false))
    }

    fn as_fd(&self) -> BorrowedFd<'_> {
        self.ready.as_fd()
    }

    fn wake(&self) {
        if let Err(e) = self.ready.write(1) {
            log::error!("failed to signal readiness: {}", e);
        }
    }

    fn take_pending(&self) -> Result<Vec<SignalMessage>> {
        match self.ready.read() {
            Ok(_) | Err(nix::errno::Errno::EAGAIN) => {}
            Err(e) => return Err(Error::Connection(format!("failed to read eventfd: {}", e))),
        }
        let mut pending = Vec::new();
        loop {
            match self.incoming.try_recv() {
                Ok(msg) => pending.push(msg),
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) if pending.is_empty() => {
                    return Err(Error::Connection("the bus connection was closed".to_owned()))
                }
                Err(mpsc::TryRecvError::Disconnected) => break,
            }
        }
        Ok(pending)
    }
}

fn match_rule(rule: &SignalRule) -> Result<zbus::MatchRule<'_>> {
    Ok(zbus::MatchRule::builder()
        .msg_type(zbus::message::Type::Signal)
        .sender(rule.sender.as_str())?
        .path(rule.path.as_str())?
        .interface(rule.interface.as_str())?
        .member(rule.member.as_str())?
        .build())
}

/// The object every host exports at [`names::HOST_OBJECT`].
struct HostObject;

#[zbus::interface(name = "org.kde.StatusNotifierHost")]
impl HostObject {
    /// ProtocolVersion property
    #[zbus(property)]
    fn protocol_version(&self) -> u32 {
        names::PROTOCOL_VERSION
    }
}

fn classify_fdo(peer: &str, e: zbus::fdo::Error) -> Error {
    use zbus::fdo::Error as Fdo;
    match e {
        Fdo::ServiceUnknown(_)
        | Fdo::NameHasNoOwner(_)
        | Fdo::NoReply(_)
        | Fdo::Disconnected(_)
        | Fdo::UnknownObject(_)
        | Fdo::Timeout(_)
        | Fdo::TimedOut(_) => Error::PeerGone(peer.to_owned()),
        Fdo::UnknownProperty(msg) | Fdo::UnknownInterface(msg) | Fdo::UnknownMethod(msg) | Fdo::InvalidArgs(msg) => {
            Error::Unsupported(msg)
        }
        Fdo::ZBus(e) => classify(peer, e),
        e => Error::DbusError(zbus::Error::FDO(Box::new(e))),
    }
}

fn classify(peer: &str, e: zbus::Error) -> Error {
    match e {
        zbus::Error::FDO(e) => classify_fdo(peer, *e),
        zbus::Error::MethodError(name, msg, reply) => match name.as_str() {
            "org.freedesktop.DBus.Error.ServiceUnknown"
            | "org.freedesktop.DBus.Error.NameHasNoOwner"
            | "org.freedesktop.DBus.Error.NoReply"
            | "org.freedesktop.DBus.Error.Disconnected"
            | "org.freedesktop.DBus.Error.UnknownObject" => Error::PeerGone(peer.to_owned()),
            "org.freedesktop.DBus.Error.UnknownProperty"
            | "org.freedesktop.DBus.Error.UnknownInterface"
            | "org.freedesktop.DBus.Error.UnknownMethod" => Error::Unsupported(msg.unwrap_or_else(|| name.to_string())),
            _ => Error::DbusError(zbus::Error::MethodError(name, msg, reply)),
        },
        zbus::Error::InputOutput(e) => Error::Connection(e.to_string()),
        e => Error::DbusError(e),
    }
}

/// Convert a zvariant value into the protocol's own value model.
fn wire_value(value: &zvariant::Value<'_>) -> Value {
    use zvariant::Value as Z;
    match value {
        Z::Bool(b) => Value::Bool(*b),
        Z::U8(x) => Value::Byte(*x),
        Z::I16(x) => Value::I32((*x).into()),
        Z::U16(x) => Value::U32((*x).into()),
        Z::I32(x) => Value::I32(*x),
        Z::U32(x) => Value::U32(*x),
        Z::I64(x) => Value::I64(*x),
        Z::U64(x) => Value::U64(*x),
        Z::Str(s) => Value::Str(s.to_string()),
        Z::ObjectPath(p) => Value::ObjectPath(p.to_string()),
        Z::Value(inner) => wire_value(inner),
        Z::Array(array) => {
            let elements: Vec<Value> = array.iter().map(wire_value).collect();
            if !elements.is_empty() && elements.iter().all(|e| matches!(e, Value::Byte(_))) {
                Value::Bytes(elements.into_iter().filter_map(|e| if let Value::Byte(b) = e { Some(b) } else { None }).collect())
            } else {
                Value::Array(elements)
            }
        }
        Z::Structure(s) => Value::Struct(s.fields().iter().map(wire_value).collect()),
        other => Value::Other(other.value_signature().to_string()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_wire_value_of_byte_arrays() {
        let value = zvariant::Value::from(vec![0xffu8, 1, 2, 3]);
        assert_eq!(wire_value(&value), Value::Bytes(vec![0xff, 1, 2, 3]));
        let value = zvariant::Value::from(Vec::<u8>::new());
        assert_eq!(wire_value(&value), Value::Array(vec![]));
    }

    #[test]
    fn test_wire_value_unwraps_variants() {
        let value = zvariant::Value::Value(Box::new(zvariant::Value::from("hello")));
        assert_eq!(wire_value(&value), Value::from("hello"));
    }

    #[test]
    fn test_classify_peer_gone() {
        let e = zbus::fdo::Error::ServiceUnknown("gone".to_owned());
        assert!(classify_fdo(":1.5", e).is_peer_gone());
        let e = zbus::fdo::Error::UnknownProperty("no menu".to_owned());
        assert!(matches!(classify_fdo(":1.5", e), Error::Unsupported(_)));
    }
}
