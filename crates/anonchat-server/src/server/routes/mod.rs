// Route modules for Anonchat Server
pub mod websocket; // Chat transport: one WebSocket per visitor
